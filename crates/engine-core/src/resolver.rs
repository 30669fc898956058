use crate::schema::{Format, Schema};
use crate::tree::{
    Document, ElementNode, Node, Path, Point, Range, inline_text_len, node_at_path,
    point_global_offset,
};

/// A block that holds inline content directly, in document order.
pub struct TextBlock<'a> {
    pub path: Path,
    pub el: &'a ElementNode,
}

pub fn text_blocks_in_order<'a>(doc: &'a Document, schema: &Schema) -> Vec<TextBlock<'a>> {
    fn walk<'a>(
        nodes: &'a [Node],
        path: &mut Vec<usize>,
        schema: &Schema,
        out: &mut Vec<TextBlock<'a>>,
    ) {
        for (ix, node) in nodes.iter().enumerate() {
            let Node::Element(el) = node else {
                continue;
            };

            path.push(ix);

            if schema.is_text_block(&el.kind) {
                out.push(TextBlock {
                    path: path.clone(),
                    el,
                });
            } else if schema.is_block(&el.kind) {
                walk(&el.children, path, schema, out);
            }

            path.pop();
        }
    }

    let mut out = Vec::new();
    walk(&doc.children, &mut Vec::new(), schema, &mut out);
    out
}

/// The nearest text-block ancestor containing `path`, as an index into
/// `blocks`.
pub fn block_index_of(blocks: &[TextBlock<'_>], path: &[usize]) -> Option<usize> {
    blocks
        .iter()
        .position(|b| path.len() > b.path.len() && path.starts_with(&b.path))
}

/// The global byte window a range covers inside one block of a block run.
pub fn block_window(
    blocks: &[TextBlock<'_>],
    block_index: usize,
    start_index: usize,
    end_index: usize,
    start: &Point,
    end: &Point,
) -> (usize, usize) {
    let block = &blocks[block_index];
    let children = block.el.children.as_slice();
    let start_global = if block_index == start_index {
        point_global_offset(children, &start.path[block.path.len()..], start.offset)
    } else {
        0
    };
    let end_global = if block_index == end_index {
        point_global_offset(children, &end.path[block.path.len()..], end.offset)
    } else {
        inline_text_len(children)
    };
    (start_global, end_global)
}

/// True iff every non-empty text leaf intersecting `range` is enclosed by
/// the span associated with `format`. A collapsed range carries no content
/// and is never formatted.
pub fn is_formatted(doc: &Document, schema: &Schema, range: &Range, format: Format) -> bool {
    if range.is_collapsed() {
        return false;
    }
    let (start, end) = range.ordered();

    let blocks = text_blocks_in_order(doc, schema);
    let Some(start_index) = block_index_of(&blocks, &start.path) else {
        return false;
    };
    let Some(end_index) = block_index_of(&blocks, &end.path) else {
        return false;
    };

    let mut saw_leaf = false;
    for (block_index, block) in blocks
        .iter()
        .enumerate()
        .take(end_index + 1)
        .skip(start_index)
    {
        let (window_start, window_end) =
            block_window(&blocks, block_index, start_index, end_index, &start, &end);
        if window_start >= window_end {
            continue;
        }

        let mut cursor = 0usize;
        if !leaves_enclosed(
            &block.el.children,
            &mut cursor,
            window_start,
            window_end,
            format,
            false,
            &mut saw_leaf,
        ) {
            return false;
        }
    }

    saw_leaf
}

fn leaves_enclosed(
    nodes: &[Node],
    cursor: &mut usize,
    window_start: usize,
    window_end: usize,
    format: Format,
    enclosed: bool,
    saw_leaf: &mut bool,
) -> bool {
    for node in nodes {
        match node {
            Node::Text(t) => {
                let node_start = *cursor;
                let node_end = node_start + t.text.len();
                *cursor = node_end;
                if window_end <= node_start || window_start >= node_end {
                    continue;
                }
                *saw_leaf = true;
                if !enclosed {
                    return false;
                }
            }
            Node::Element(el) => {
                let child_enclosed = enclosed || format.matches(el);
                if !leaves_enclosed(
                    &el.children,
                    cursor,
                    window_start,
                    window_end,
                    format,
                    child_enclosed,
                    saw_leaf,
                ) {
                    return false;
                }
            }
        }
    }
    true
}

/// Walks ancestors from `path` until one classifies as block-level. The
/// editing root is a boundary: `None` when no block encloses the path.
pub fn nearest_block_ancestor(doc: &Document, schema: &Schema, path: &[usize]) -> Option<Path> {
    for len in (1..=path.len()).rev() {
        let prefix = &path[..len];
        if let Some(Node::Element(el)) = node_at_path(doc, prefix) {
            if schema.is_block(&el.kind) {
                return Some(prefix.to_vec());
            }
        }
    }
    None
}

pub fn nearest_ancestor_of_kind(doc: &Document, path: &[usize], kind: &str) -> Option<Path> {
    for len in (1..=path.len()).rev() {
        let prefix = &path[..len];
        if let Some(Node::Element(el)) = node_at_path(doc, prefix) {
            if el.kind == kind {
                return Some(prefix.to_vec());
            }
        }
    }
    None
}

/// Clamp both endpoints onto existing text leaves so the engine can rely
/// on ranges addressing text.
pub fn normalize_range(doc: &Document, range: &Range) -> Range {
    let fallback = first_text_point(doc).unwrap_or(Point {
        path: vec![0],
        offset: 0,
    });

    let start = normalize_point(doc, &range.start)
        .or_else(|| normalize_point(doc, &range.end))
        .unwrap_or_else(|| fallback.clone());
    let end = normalize_point(doc, &range.end).unwrap_or_else(|| start.clone());

    Range { start, end }
}

pub fn first_text_point(doc: &Document) -> Option<Point> {
    fn walk(children: &[Node], path: &mut Vec<usize>) -> Option<Point> {
        for (ix, node) in children.iter().enumerate() {
            path.push(ix);
            match node {
                Node::Text(_) => {
                    let point = Point::new(path.clone(), 0);
                    path.pop();
                    return Some(point);
                }
                Node::Element(el) => {
                    if let Some(point) = walk(&el.children, path) {
                        path.pop();
                        return Some(point);
                    }
                }
            }
            path.pop();
        }
        None
    }

    walk(&doc.children, &mut Vec::new())
}

fn normalize_point(doc: &Document, point: &Point) -> Option<Point> {
    if point.path.is_empty() || doc.children.is_empty() {
        return None;
    }

    let mut resolved: Vec<usize> = Vec::new();
    let mut children: &[Node] = &doc.children;

    for &wanted in &point.path {
        if children.is_empty() {
            break;
        }
        let ix = wanted.min(children.len() - 1);
        resolved.push(ix);
        match &children[ix] {
            Node::Text(t) => {
                return Some(Point::new(resolved, point.offset.min(t.text.len())));
            }
            Node::Element(el) => {
                children = &el.children;
            }
        }
    }

    // The path ran out above a leaf; descend to the first text below.
    fn first_text_below(children: &[Node], path: &mut Vec<usize>) -> Option<Point> {
        for (ix, node) in children.iter().enumerate() {
            path.push(ix);
            match node {
                Node::Text(_) => return Some(Point::new(path.clone(), 0)),
                Node::Element(el) => {
                    if let Some(point) = first_text_below(&el.children, path) {
                        return Some(point);
                    }
                }
            }
            path.pop();
        }
        None
    }

    first_text_below(children, &mut resolved)
}
