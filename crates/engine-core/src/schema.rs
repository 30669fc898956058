use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tree::ElementNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Block,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: String,
    pub role: NodeRole,
}

impl NodeSpec {
    fn block(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            role: NodeRole::Block,
        }
    }

    fn inline(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            role: NodeRole::Inline,
        }
    }
}

/// Classifies node kinds as block-level or inline span. The editing root
/// itself is a boundary, never a block.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    specs: HashMap<String, NodeSpec>,
}

impl Schema {
    pub fn richtext() -> Self {
        let specs = [
            NodeSpec::block("paragraph"),
            NodeSpec::block("heading"),
            NodeSpec::block("blockquote"),
            NodeSpec::block("code_block"),
            NodeSpec::block("list"),
            NodeSpec::block("list_item"),
            NodeSpec::block("divider"),
            NodeSpec::inline("bold"),
            NodeSpec::inline("italic"),
            NodeSpec::inline("underline"),
            NodeSpec::inline("strikethrough"),
            NodeSpec::inline("subscript"),
            NodeSpec::inline("superscript"),
            NodeSpec::inline("span"),
        ];
        Self {
            specs: specs
                .into_iter()
                .map(|spec| (spec.kind.clone(), spec))
                .collect(),
        }
    }

    pub fn is_block(&self, kind: &str) -> bool {
        self.specs
            .get(kind)
            .is_some_and(|s| s.role == NodeRole::Block)
    }

    pub fn is_inline_span(&self, kind: &str) -> bool {
        self.specs
            .get(kind)
            .is_some_and(|s| s.role == NodeRole::Inline)
    }

    /// Blocks that hold inline content directly (text and spans), as
    /// opposed to structural containers like `list`.
    pub fn is_text_block(&self, kind: &str) -> bool {
        matches!(
            kind,
            "paragraph" | "heading" | "blockquote" | "code_block" | "list_item"
        )
    }
}

/// One inline formatting property a span can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Subscript,
    Superscript,
    FontName,
    FontSize,
    ForeColor,
    BackColor,
}

impl Format {
    pub const ALL: [Format; 10] = [
        Format::Bold,
        Format::Italic,
        Format::Underline,
        Format::Strikethrough,
        Format::Subscript,
        Format::Superscript,
        Format::FontName,
        Format::FontSize,
        Format::ForeColor,
        Format::BackColor,
    ];

    /// The element kind of the span marking a run with this format.
    pub fn span_kind(&self) -> &'static str {
        match self {
            Format::Bold => "bold",
            Format::Italic => "italic",
            Format::Underline => "underline",
            Format::Strikethrough => "strikethrough",
            Format::Subscript => "subscript",
            Format::Superscript => "superscript",
            Format::FontName | Format::FontSize | Format::ForeColor | Format::BackColor => "span",
        }
    }

    /// For styled formats, the attribute carrying the value.
    pub fn value_attr(&self) -> Option<&'static str> {
        match self {
            Format::FontName => Some("face"),
            Format::FontSize => Some("size"),
            Format::ForeColor => Some("color"),
            Format::BackColor => Some("background"),
            _ => None,
        }
    }

    /// Whether `el` is the span instance of this format.
    pub fn matches(&self, el: &ElementNode) -> bool {
        if el.kind != self.span_kind() {
            return false;
        }
        match self.value_attr() {
            Some(attr) => el.attrs.contains_key(attr),
            None => true,
        }
    }
}
