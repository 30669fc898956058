//! Markup serialization for the document tree.
//!
//! The serialized form is a small, HTML-shaped dialect: block elements
//! (`<p>`, `<h1>`..`<h6>`, `<blockquote>`, `<pre>`, `<ul>`/`<ol>`/`<li>`,
//! `<hr>`) and format spans (`<strong>`, `<em>`, `<u>`, `<s>`, `<sub>`,
//! `<sup>`, `<span ...>`). Parsing is lenient and never fails: unclosed
//! tags auto-close, stray close tags are ignored, unknown inline tags
//! unwrap to their children, and script/style subtrees plus handler-like
//! attributes are stripped.

use serde_json::Value;

use crate::tree::{Attrs, Document, ElementNode, Node, TextNode};

const BLOCK_ATTRS: [&str; 2] = ["align", "indent"];
const SPAN_ATTRS: [&str; 4] = ["face", "size", "color", "background"];

pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    write_nodes(&mut out, &doc.children);
    out
}

fn write_nodes(out: &mut String, nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(&escape_text(&t.text)),
            Node::Element(el) => write_element(out, el),
        }
    }
}

fn write_element(out: &mut String, el: &ElementNode) {
    let Some(tag) = tag_for_element(el) else {
        // Unknown kind: keep the content, drop the marker.
        write_nodes(out, &el.children);
        return;
    };

    out.push('<');
    out.push_str(&tag);
    let attr_names: &[&str] = if el.kind == "span" {
        &SPAN_ATTRS
    } else {
        &BLOCK_ATTRS
    };
    for name in attr_names {
        let Some(value) = el.attrs.get(*name) else {
            continue;
        };
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(&rendered));
        out.push('"');
    }

    if el.kind == "divider" {
        out.push('>');
        return;
    }

    out.push('>');
    write_nodes(out, &el.children);
    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

fn tag_for_element(el: &ElementNode) -> Option<String> {
    let tag = match el.kind.as_str() {
        "paragraph" => "p".to_string(),
        "heading" => {
            let level = el
                .attrs
                .get("level")
                .and_then(|v| v.as_u64())
                .unwrap_or(1)
                .clamp(1, 6);
            format!("h{level}")
        }
        "blockquote" => "blockquote".to_string(),
        "code_block" => "pre".to_string(),
        "list" => {
            if el.attrs.get("list_type").and_then(|v| v.as_str()) == Some("numbered") {
                "ol".to_string()
            } else {
                "ul".to_string()
            }
        }
        "list_item" => "li".to_string(),
        "divider" => "hr".to_string(),
        "bold" => "strong".to_string(),
        "italic" => "em".to_string(),
        "underline" => "u".to_string(),
        "strikethrough" => "s".to_string(),
        "subscript" => "sub".to_string(),
        "superscript" => "sup".to_string(),
        "span" => "span".to_string(),
        _ => return None,
    };
    Some(tag)
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Parse a full document. Stray top-level text and inline nodes are
/// grouped into paragraphs; an empty input yields one empty paragraph.
pub fn parse(input: &str) -> Document {
    let nodes = parse_fragment(input);

    let mut children: Vec<Node> = Vec::new();
    let mut pending_inline: Vec<Node> = Vec::new();

    for node in nodes {
        if is_block_node(&node) {
            flush_inline(&mut children, &mut pending_inline);
            children.push(node);
        } else {
            pending_inline.push(node);
        }
    }
    flush_inline(&mut children, &mut pending_inline);

    if children.is_empty() {
        children.push(Node::paragraph(""));
    }

    Document { children }
}

fn is_block_node(node: &Node) -> bool {
    matches!(
        node,
        Node::Element(el) if matches!(
            el.kind.as_str(),
            "paragraph" | "heading" | "blockquote" | "code_block" | "list" | "list_item"
                | "divider"
        )
    )
}

fn flush_inline(children: &mut Vec<Node>, pending: &mut Vec<Node>) {
    if pending.is_empty() {
        return;
    }
    let inline = std::mem::take(pending);
    let only_whitespace = inline.iter().all(|n| match n {
        Node::Text(t) => t.text.trim().is_empty(),
        Node::Element(_) => false,
    });
    if only_whitespace {
        return;
    }
    children.push(Node::Element(ElementNode {
        kind: "paragraph".to_string(),
        attrs: Attrs::default(),
        children: inline,
    }));
}

/// Parse and sanitize a markup fragment into nodes. Script/style subtrees
/// are dropped, `on*` attributes and `javascript:` values stripped.
pub fn parse_fragment(input: &str) -> Vec<Node> {
    let tokens = tokenize(input);
    build_nodes(tokens)
}

enum Token {
    Text(String),
    Open {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Close(String),
}

fn tokenize(input: &str) -> Vec<Token> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut ix = 0usize;

    while ix < bytes.len() {
        if bytes[ix] != b'<' {
            let start = ix;
            while ix < bytes.len() && bytes[ix] != b'<' {
                ix += 1;
            }
            tokens.push(Token::Text(decode_entities(&input[start..ix])));
            continue;
        }

        // Comment, doctype or processing instruction: skip to '>'.
        if matches!(bytes.get(ix + 1), Some(b'!') | Some(b'?')) {
            while ix < bytes.len() && bytes[ix] != b'>' {
                ix += 1;
            }
            ix = (ix + 1).min(bytes.len());
            continue;
        }

        if bytes.get(ix + 1) == Some(&b'/') {
            ix += 2;
            let start = ix;
            while ix < bytes.len() && bytes[ix] != b'>' {
                ix += 1;
            }
            let name = input[start..ix].trim().to_ascii_lowercase();
            ix = (ix + 1).min(bytes.len());
            if !name.is_empty() {
                tokens.push(Token::Close(name));
            }
            continue;
        }

        if !bytes
            .get(ix + 1)
            .is_some_and(|b| b.is_ascii_alphabetic())
        {
            // A lone '<' in text.
            tokens.push(Token::Text("<".to_string()));
            ix += 1;
            continue;
        }

        ix += 1;
        let name_start = ix;
        while ix < bytes.len() && (bytes[ix].is_ascii_alphanumeric()) {
            ix += 1;
        }
        let tag = input[name_start..ix].to_ascii_lowercase();

        let mut attrs: Vec<(String, String)> = Vec::new();
        loop {
            while ix < bytes.len() && bytes[ix].is_ascii_whitespace() {
                ix += 1;
            }
            if ix >= bytes.len() || bytes[ix] == b'>' || bytes[ix] == b'/' {
                break;
            }
            let attr_start = ix;
            while ix < bytes.len()
                && !bytes[ix].is_ascii_whitespace()
                && bytes[ix] != b'='
                && bytes[ix] != b'>'
                && bytes[ix] != b'/'
            {
                ix += 1;
            }
            let name = input[attr_start..ix].to_ascii_lowercase();
            let mut value = String::new();
            while ix < bytes.len() && bytes[ix].is_ascii_whitespace() {
                ix += 1;
            }
            if bytes.get(ix) == Some(&b'=') {
                ix += 1;
                while ix < bytes.len() && bytes[ix].is_ascii_whitespace() {
                    ix += 1;
                }
                match bytes.get(ix) {
                    Some(&quote @ (b'"' | b'\'')) => {
                        ix += 1;
                        let value_start = ix;
                        while ix < bytes.len() && bytes[ix] != quote {
                            ix += 1;
                        }
                        value = decode_entities(&input[value_start..ix]);
                        ix = (ix + 1).min(bytes.len());
                    }
                    _ => {
                        let value_start = ix;
                        while ix < bytes.len()
                            && !bytes[ix].is_ascii_whitespace()
                            && bytes[ix] != b'>'
                        {
                            ix += 1;
                        }
                        value = decode_entities(&input[value_start..ix]);
                    }
                }
            }
            if !name.is_empty() {
                attrs.push((name, value));
            }
        }

        while ix < bytes.len() && bytes[ix] != b'>' {
            ix += 1;
        }
        ix = (ix + 1).min(bytes.len());

        tokens.push(Token::Open { tag, attrs });
    }

    tokens
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((ix, ch)) = chars.next() {
        if ch != '&' {
            out.push(ch);
            continue;
        }
        let rest = &text[ix + 1..];
        let Some(end) = rest.find(';').filter(|&e| e <= 8) else {
            out.push('&');
            continue;
        };
        let entity = &rest[..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16)
                    .ok()
                    .and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => {
                entity[1..].parse::<u32>().ok().and_then(char::from_u32)
            }
            _ => None,
        };
        match decoded {
            Some(decoded) => {
                out.push(decoded);
                for _ in 0..=end {
                    chars.next();
                }
            }
            None => out.push('&'),
        }
    }
    out
}

struct Frame {
    tag: String,
    kind: Option<String>,
    attrs: Attrs,
    children: Vec<Node>,
}

fn build_nodes(tokens: Vec<Token>) -> Vec<Node> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut skip_tag: Option<(String, usize)> = None;

    fn push_node(root: &mut Vec<Node>, stack: &mut Vec<Frame>, node: Node) {
        match stack.last_mut() {
            Some(frame) => frame.children.push(node),
            None => root.push(node),
        }
    }

    fn finish_frame(root: &mut Vec<Node>, stack: &mut Vec<Frame>, frame: Frame) {
        match frame.kind {
            Some(kind) => {
                let node = Node::Element(ElementNode {
                    kind,
                    attrs: frame.attrs,
                    children: frame.children,
                });
                push_node(root, stack, node);
            }
            None => {
                // Unknown inline wrapper: splice its children in place.
                for child in frame.children {
                    push_node(root, stack, child);
                }
            }
        }
    }

    for token in tokens {
        if let Some((tag, depth)) = &mut skip_tag {
            match &token {
                Token::Open { tag: open, .. } if open == tag => *depth += 1,
                Token::Close(close) if close == tag => {
                    if *depth == 0 {
                        skip_tag = None;
                    } else {
                        *depth -= 1;
                    }
                }
                _ => {}
            }
            continue;
        }

        match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    push_node(&mut root, &mut stack, Node::Text(TextNode { text }));
                }
            }
            Token::Open { tag, attrs } => {
                if tag == "script" || tag == "style" {
                    skip_tag = Some((tag, 0));
                    continue;
                }
                if tag == "br" {
                    push_node(&mut root, &mut stack, Node::text("\n"));
                    continue;
                }
                if tag == "hr" {
                    push_node(&mut root, &mut stack, Node::divider());
                    continue;
                }
                if matches!(tag.as_str(), "img" | "input" | "meta" | "link" | "iframe") {
                    // Void or embed tags the model does not carry.
                    continue;
                }

                let (kind, attrs) = classify_tag(&tag, attrs);
                stack.push(Frame {
                    tag,
                    kind,
                    attrs,
                    children: Vec::new(),
                });
            }
            Token::Close(tag) => {
                let Some(pos) = stack.iter().rposition(|f| f.tag == tag) else {
                    continue;
                };
                while stack.len() > pos {
                    let Some(frame) = stack.pop() else {
                        break;
                    };
                    finish_frame(&mut root, &mut stack, frame);
                }
            }
        }
    }

    while let Some(frame) = stack.pop() {
        finish_frame(&mut root, &mut stack, frame);
    }

    root
}

fn classify_tag(tag: &str, raw_attrs: Vec<(String, String)>) -> (Option<String>, Attrs) {
    let kind: Option<&str> = match tag {
        "p" | "div" => Some("paragraph"),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some("heading"),
        "blockquote" => Some("blockquote"),
        "pre" => Some("code_block"),
        "ul" | "ol" => Some("list"),
        "li" => Some("list_item"),
        "strong" | "b" => Some("bold"),
        "em" | "i" => Some("italic"),
        "u" => Some("underline"),
        "s" | "strike" | "del" => Some("strikethrough"),
        "sub" => Some("subscript"),
        "sup" => Some("superscript"),
        "span" | "font" => Some("span"),
        _ => None,
    };

    let mut attrs = Attrs::default();
    let allowed: &[&str] = match kind {
        Some("span") => &SPAN_ATTRS,
        Some(_) => &BLOCK_ATTRS,
        None => &[],
    };
    for (name, value) in raw_attrs {
        if name.starts_with("on") {
            continue;
        }
        let trimmed = value.trim();
        if trimmed
            .to_ascii_lowercase()
            .starts_with("javascript:")
        {
            continue;
        }
        if !allowed.contains(&name.as_str()) {
            continue;
        }
        if name == "indent" {
            if let Ok(indent) = trimmed.parse::<u64>() {
                attrs.insert(name, Value::Number(indent.into()));
            }
            continue;
        }
        attrs.insert(name, Value::String(value));
    }

    if let Some(level) = tag.strip_prefix('h').and_then(|l| l.parse::<u64>().ok()) {
        if (1..=6).contains(&level) {
            attrs.insert("level".to_string(), Value::Number(level.into()));
        }
    }
    if tag == "ol" {
        attrs.insert(
            "list_type".to_string(),
            Value::String("numbered".to_string()),
        );
    }
    if tag == "ul" {
        attrs.insert(
            "list_type".to_string(),
            Value::String("bulleted".to_string()),
        );
    }

    (kind.map(str::to_string), attrs)
}

/// Plain text of the tree: text leaves concatenated, one newline per
/// inline-bearing block.
pub fn plain_text(doc: &Document) -> String {
    fn walk(nodes: &[Node], out: &mut String) {
        for node in nodes {
            match node {
                Node::Text(t) => out.push_str(&t.text),
                Node::Element(el) => {
                    walk(&el.children, out);
                    if matches!(
                        el.kind.as_str(),
                        "paragraph" | "heading" | "blockquote" | "code_block" | "list_item"
                    ) {
                        out.push('\n');
                    }
                }
            }
        }
    }

    let mut out = String::new();
    walk(&doc.children, &mut out);
    while out.ends_with('\n') {
        out.pop();
    }
    out
}
