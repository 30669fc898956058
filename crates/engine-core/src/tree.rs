use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type Attrs = BTreeMap<String, serde_json::Value>;
pub type ElementKind = String;
pub type Path = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Element(ElementNode),
    Text(TextNode),
}

impl Node {
    pub fn element(kind: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(ElementNode {
            kind: kind.into(),
            attrs: Attrs::default(),
            children,
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(TextNode { text: text.into() })
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Node::element("paragraph", vec![Node::text(text)])
    }

    pub fn divider() -> Self {
        Node::element("divider", Vec::new())
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextNode> {
        match self {
            Node::Text(t) => Some(t),
            Node::Element(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub kind: ElementKind,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub path: Path,
    pub offset: usize,
}

impl Point {
    pub fn new(path: Path, offset: usize) -> Self {
        Self { path, offset }
    }
}

/// A span over the document tree: two (node path, offset) endpoints.
/// `start` and `end` are stored as given; `ordered` yields them in
/// document order. A collapsed range is a caret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Point,
    pub end: Point,
}

impl Range {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn collapsed(point: Point) -> Self {
        Self {
            start: point.clone(),
            end: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Endpoints in document order. Index paths compare lexicographically,
    /// which matches document order because an ancestor path is a strict
    /// prefix of its descendants.
    pub fn ordered(&self) -> (Point, Point) {
        let mut start = self.start.clone();
        let mut end = self.end.clone();
        if start.path == end.path {
            if end.offset < start.offset {
                std::mem::swap(&mut start, &mut end);
            }
            return (start, end);
        }
        if end.path < start.path {
            std::mem::swap(&mut start, &mut end);
        }
        (start, end)
    }
}

#[derive(Debug)]
pub struct PathError(pub String);

pub fn node_at_path<'a>(doc: &'a Document, path: &[usize]) -> Option<&'a Node> {
    if path.is_empty() {
        return None;
    }

    let mut node = doc.children.get(path[0])?;
    for &ix in path.iter().skip(1) {
        node = match node {
            Node::Element(el) => el.children.get(ix)?,
            Node::Text(_) => return None,
        };
    }
    Some(node)
}

pub fn children_at_path<'a>(doc: &'a Document, parent_path: &[usize]) -> Option<&'a [Node]> {
    if parent_path.is_empty() {
        return Some(&doc.children);
    }
    match node_at_path(doc, parent_path)? {
        Node::Element(el) => Some(&el.children),
        Node::Text(_) => None,
    }
}

pub fn children_at_path_mut<'a>(
    doc: &'a mut Document,
    parent_path: &[usize],
) -> Result<&'a mut Vec<Node>, PathError> {
    let mut children = &mut doc.children;
    for (depth, &ix) in parent_path.iter().enumerate() {
        if ix >= children.len() {
            return Err(PathError(format!(
                "Path out of bounds at depth {depth}: {ix} >= {}",
                children.len()
            )));
        }
        children = match &mut children[ix] {
            Node::Element(el) => &mut el.children,
            Node::Text(_) => {
                return Err(PathError(format!("Non-container node at depth {depth}")));
            }
        };
    }
    Ok(children)
}

pub fn node_at_path_mut<'a>(
    doc: &'a mut Document,
    path: &[usize],
) -> Result<&'a mut Node, PathError> {
    let (ix, parent_path) = path
        .split_last()
        .ok_or_else(|| PathError("Empty path".into()))?;
    let children = children_at_path_mut(doc, parent_path)?;
    children
        .get_mut(*ix)
        .ok_or_else(|| PathError(format!("Index out of bounds: {ix}")))
}

pub fn insert_node(doc: &mut Document, path: &[usize], node: Node) -> Result<(), PathError> {
    let (ix, parent_path) = path
        .split_last()
        .ok_or_else(|| PathError("Empty insert path".into()))?;
    let children = children_at_path_mut(doc, parent_path)?;
    if *ix > children.len() {
        return Err(PathError(format!(
            "Insert index out of bounds: {ix} > {}",
            children.len()
        )));
    }
    children.insert(*ix, node);
    Ok(())
}

pub fn remove_node(doc: &mut Document, path: &[usize]) -> Result<Node, PathError> {
    let (ix, parent_path) = path
        .split_last()
        .ok_or_else(|| PathError("Empty remove path".into()))?;
    let children = children_at_path_mut(doc, parent_path)?;
    if *ix >= children.len() {
        return Err(PathError(format!(
            "Remove index out of bounds: {ix} >= {}",
            children.len()
        )));
    }
    Ok(children.remove(*ix))
}

/// Replace the node at `path`, returning the old node.
pub fn replace_node(doc: &mut Document, path: &[usize], node: Node) -> Result<Node, PathError> {
    let target = node_at_path_mut(doc, path)?;
    Ok(std::mem::replace(target, node))
}

/// Replace the node at `path` with its own children, re-parenting them in
/// place. Returns the number of children spliced in.
pub fn unwrap_node(doc: &mut Document, path: &[usize]) -> Result<usize, PathError> {
    let removed = remove_node(doc, path)?;
    let children = match removed {
        Node::Element(el) => el.children,
        Node::Text(_) => return Err(PathError("Cannot unwrap a text node".into())),
    };
    let count = children.len();
    let (ix, parent_path) = path
        .split_last()
        .ok_or_else(|| PathError("Empty unwrap path".into()))?;
    let siblings = children_at_path_mut(doc, parent_path)?;
    for (offset, child) in children.into_iter().enumerate() {
        siblings.insert(ix + offset, child);
    }
    Ok(count)
}

pub fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}

/// Total text length of an inline subtree, in bytes.
pub fn inline_text_len(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            Node::Text(t) => t.text.len(),
            Node::Element(el) => inline_text_len(&el.children),
        })
        .sum()
}

/// Global byte offset of a point within the inline subtree rooted at the
/// children of the block at `block_path`. The point must address a text
/// leaf somewhere below the block.
pub fn point_global_offset(children: &[Node], rel_path: &[usize], offset: usize) -> usize {
    let Some((&ix, rest)) = rel_path.split_first() else {
        return 0;
    };
    let mut global = 0usize;
    for (child_ix, node) in children.iter().enumerate() {
        if child_ix < ix {
            global += match node {
                Node::Text(t) => t.text.len(),
                Node::Element(el) => inline_text_len(&el.children),
            };
            continue;
        }
        match node {
            Node::Text(t) => {
                global += clamp_to_char_boundary(&t.text, offset);
            }
            Node::Element(el) => {
                global += point_global_offset(&el.children, rest, offset);
            }
        }
        break;
    }
    global
}

/// Inverse of `point_global_offset`: resolve a global byte offset to a
/// (path, offset) point below `block_path`. Falls back to the end of the
/// last text leaf when the offset overshoots.
pub fn point_for_global_offset(block_path: &[usize], children: &[Node], global: usize) -> Point {
    fn descend(nodes: &[Node], path: &mut Vec<usize>, remaining: &mut usize) -> Option<Point> {
        for (ix, node) in nodes.iter().enumerate() {
            path.push(ix);
            match node {
                Node::Text(t) => {
                    if *remaining <= t.text.len() {
                        let offset = clamp_to_char_boundary(&t.text, *remaining);
                        return Some(Point::new(path.clone(), offset));
                    }
                    *remaining -= t.text.len();
                }
                Node::Element(el) => {
                    if let Some(point) = descend(&el.children, path, remaining) {
                        return Some(point);
                    }
                }
            }
            path.pop();
        }
        None
    }

    fn last_leaf(nodes: &[Node], path: &mut Vec<usize>) -> Option<Point> {
        for (ix, node) in nodes.iter().enumerate().rev() {
            path.push(ix);
            match node {
                Node::Text(t) => return Some(Point::new(path.clone(), t.text.len())),
                Node::Element(el) => {
                    if let Some(point) = last_leaf(&el.children, path) {
                        return Some(point);
                    }
                }
            }
            path.pop();
        }
        None
    }

    let mut path = block_path.to_vec();
    let mut remaining = global;
    if let Some(point) = descend(children, &mut path, &mut remaining) {
        return point;
    }
    let mut path = block_path.to_vec();
    if let Some(point) = last_leaf(children, &mut path) {
        return point;
    }
    let mut path = block_path.to_vec();
    path.push(0);
    Point::new(path, 0)
}
