use serde_json::Value;

use crate::channel::Channel;
use crate::history::SnapshotHistory;
use crate::markup;
use crate::resolver::{
    self, block_index_of, block_window, nearest_ancestor_of_kind, nearest_block_ancestor,
    normalize_range, text_blocks_in_order,
};
use crate::schema::{Format, Schema};
use crate::tree::{
    Attrs, Document, ElementNode, Node, Path, Point, Range, children_at_path,
    children_at_path_mut, clamp_to_char_boundary, inline_text_len, insert_node, node_at_path,
    node_at_path_mut, point_for_global_offset, remove_node, unwrap_node,
};

pub const MAX_INDENT_LEVEL: u64 = 8;

#[derive(Debug, Clone)]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<crate::tree::PathError> for CommandError {
    fn from(err: crate::tree::PathError) -> Self {
        CommandError::new(err.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CommandExecuted {
        command: String,
        value: Option<Value>,
        succeeded: bool,
    },
    CommandError {
        command: String,
        message: String,
    },
    StateSaved,
    Undo,
    Redo,
}

/// Host escape hatch for command names the engine does not know. Installed
/// by the composition root; runs inside the engine's snapshot bracket so
/// even foreign mutations stay undoable.
pub type NativeFallback = Box<dyn FnMut(&str, Option<&Value>, &mut Document) -> bool>;

/// A range expressed as global text offsets within blocks, stable across
/// inline restructuring so command handlers can remap the selection after
/// a mutation.
struct OffsetRange {
    start_block: Path,
    start: usize,
    end_block: Path,
    end: usize,
}

impl OffsetRange {
    fn collapsed(block: Path, offset: usize) -> Self {
        Self {
            start_block: block.clone(),
            start: offset,
            end_block: block,
            end: offset,
        }
    }

    fn resolve(&self, doc: &Document) -> Range {
        let start = resolve_point(doc, &self.start_block, self.start);
        let end = resolve_point(doc, &self.end_block, self.end);
        Range { start, end }
    }
}

fn resolve_point(doc: &Document, block_path: &[usize], global: usize) -> Point {
    match children_at_path(doc, block_path) {
        Some(children) => point_for_global_offset(block_path, children, global),
        None => resolver::first_text_point(doc).unwrap_or(Point::new(vec![0], 0)),
    }
}

/// The command dispatch and mutation core. Owns the live tree, the active
/// range and a rolling bounded snapshot history. `execute_command` never
/// panics: failures degrade to `false` plus a `CommandError` event, and
/// the tree stays structurally valid.
pub struct CommandEngine {
    doc: Document,
    schema: Schema,
    range: Option<Range>,
    history: SnapshotHistory,
    events: Channel<EngineEvent>,
    native_fallback: Option<NativeFallback>,
}

impl CommandEngine {
    pub fn new() -> Self {
        Self::with_document(Document {
            children: vec![Node::paragraph("")],
        })
    }

    pub fn with_document(doc: Document) -> Self {
        let mut engine = Self {
            doc,
            schema: Schema::richtext(),
            range: None,
            history: SnapshotHistory::new(),
            events: Channel::new(),
            native_fallback: None,
        };
        engine.normalize();
        engine.history.reset(markup::serialize(&engine.doc));
        engine
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn content(&self) -> String {
        markup::serialize(&self.doc)
    }

    /// Replace the tree from serialized content, resetting the engine
    /// history and the range. Used when the focused document switches.
    pub fn load(&mut self, content: &str) {
        self.doc = markup::parse(content);
        self.normalize();
        self.history.reset(markup::serialize(&self.doc));
        self.range = resolver::first_text_point(&self.doc).map(Range::collapsed);
    }

    pub fn range(&self) -> Option<&Range> {
        self.range.as_ref()
    }

    pub fn set_range(&mut self, range: Range) {
        self.range = Some(normalize_range(&self.doc, &range));
    }

    pub fn clear_range(&mut self) {
        self.range = None;
    }

    pub fn events_mut(&mut self) -> &mut Channel<EngineEvent> {
        &mut self.events
    }

    pub fn set_native_fallback(&mut self, fallback: NativeFallback) {
        self.native_fallback = Some(fallback);
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.history.undo() else {
            return false;
        };
        let snapshot = snapshot.to_string();
        self.restore(&snapshot);
        self.events.emit(&EngineEvent::Undo);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.history.redo() else {
            return false;
        };
        let snapshot = snapshot.to_string();
        self.restore(&snapshot);
        self.events.emit(&EngineEvent::Redo);
        true
    }

    fn restore(&mut self, snapshot: &str) {
        self.doc = markup::parse(snapshot);
        self.normalize();
        if let Some(range) = &self.range {
            self.range = Some(normalize_range(&self.doc, range));
        }
    }

    /// Whether every non-empty leaf intersecting the active range carries
    /// `format`.
    pub fn is_formatted(&self, format: Format) -> bool {
        match &self.range {
            Some(range) => resolver::is_formatted(&self.doc, &self.schema, range, format),
            None => false,
        }
    }

    /// Kind of the nearest block enclosing the range start.
    pub fn active_block_kind(&self) -> Option<String> {
        let range = self.range.as_ref()?;
        let (start, _) = range.ordered();
        let path = nearest_block_ancestor(&self.doc, &self.schema, &start.path)?;
        node_at_path(&self.doc, &path)
            .and_then(Node::as_element)
            .map(|el| el.kind.clone())
    }

    pub fn active_align(&self) -> Option<String> {
        let range = self.range.as_ref()?;
        let (start, _) = range.ordered();
        let path = nearest_block_ancestor(&self.doc, &self.schema, &start.path)?;
        node_at_path(&self.doc, &path)
            .and_then(Node::as_element)
            .and_then(|el| el.attrs.get("align"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn execute_command(&mut self, command: &str, value: Option<Value>) -> bool {
        let result = self.dispatch(command, value.as_ref());
        let succeeded = result.is_ok();
        if let Err(err) = result {
            self.events.emit(&EngineEvent::CommandError {
                command: command.to_string(),
                message: err.message().to_string(),
            });
        }
        self.events.emit(&EngineEvent::CommandExecuted {
            command: command.to_string(),
            value,
            succeeded,
        });
        succeeded
    }

    fn dispatch(&mut self, command: &str, value: Option<&Value>) -> Result<(), CommandError> {
        match command {
            "bold" => self.toggle_format(Format::Bold),
            "italic" => self.toggle_format(Format::Italic),
            "underline" => self.toggle_format(Format::Underline),
            "strikeThrough" => self.toggle_format(Format::Strikethrough),
            "subscript" => self.toggle_format(Format::Subscript),
            "superscript" => self.toggle_format(Format::Superscript),
            "fontName" => self.style_format(Format::FontName, string_value(command, value)?),
            "fontSize" => self.style_format(Format::FontSize, string_value(command, value)?),
            "foreColor" => self.style_format(Format::ForeColor, string_value(command, value)?),
            "backColor" | "hiliteColor" => {
                self.style_format(Format::BackColor, string_value(command, value)?)
            }
            "justifyLeft" => self.justify("left"),
            "justifyCenter" => self.justify("center"),
            "justifyRight" => self.justify("right"),
            "justifyFull" => self.justify("justify"),
            "insertUnorderedList" => self.toggle_list("bulleted"),
            "insertOrderedList" => self.toggle_list("numbered"),
            "formatBlock" => self.format_block(string_value(command, value)?),
            "removeFormat" => self.remove_format(),
            "indent" => self.adjust_indent(1),
            "outdent" => self.adjust_indent(-1),
            "insertHorizontalRule" => self.insert_horizontal_rule(),
            "insertText" => self.insert_text(string_value(command, value)?),
            "insertHTML" => self.insert_markup(string_value(command, value)?),
            _ => self.run_native_fallback(command, value),
        }
    }

    fn run_native_fallback(
        &mut self,
        command: &str,
        value: Option<&Value>,
    ) -> Result<(), CommandError> {
        let Some(mut fallback) = self.native_fallback.take() else {
            return Err(CommandError::new(format!("Unknown command: {command}")));
        };
        let result = self.mutate(|engine| {
            if fallback(command, value, &mut engine.doc) {
                Ok(None)
            } else {
                Err(CommandError::new(format!(
                    "Native command failed: {command}"
                )))
            }
        });
        self.native_fallback = Some(fallback);
        result
    }

    /// Bracket one mutation: run the handler, normalize, remap the range,
    /// then commit pre/post snapshots to the bounded history.
    fn mutate<F>(&mut self, f: F) -> Result<(), CommandError>
    where
        F: FnOnce(&mut Self) -> Result<Option<OffsetRange>, CommandError>,
    {
        let before = markup::serialize(&self.doc);
        let offset_range = f(self)?;
        self.normalize();
        if let Some(offset_range) = offset_range {
            self.range = Some(offset_range.resolve(&self.doc));
        }
        if let Some(range) = &self.range {
            self.range = Some(normalize_range(&self.doc, range));
        }
        let after = markup::serialize(&self.doc);
        self.history.commit(before, after);
        self.events.emit(&EngineEvent::StateSaved);
        Ok(())
    }

    fn required_range(&self) -> Result<Range, CommandError> {
        self.range
            .clone()
            .ok_or_else(|| CommandError::new("No active range"))
    }

    fn spanned_range(&self) -> Result<Range, CommandError> {
        let range = self.required_range()?;
        if range.is_collapsed() {
            return Err(CommandError::new("Range is collapsed"));
        }
        Ok(range)
    }

    /// The per-block windows a range covers: (block path, start byte, end
    /// byte), in document order. Owned so the tree can be mutated while
    /// iterating.
    fn range_windows(&self, range: &Range) -> Result<Vec<(Path, usize, usize)>, CommandError> {
        let (start, end) = range.ordered();
        let blocks = text_blocks_in_order(&self.doc, &self.schema);
        let start_index = block_index_of(&blocks, &start.path)
            .ok_or_else(|| CommandError::new("Range start is not in a text block"))?;
        let end_index = block_index_of(&blocks, &end.path)
            .ok_or_else(|| CommandError::new("Range end is not in a text block"))?;

        let mut windows = Vec::new();
        for block_index in start_index..=end_index {
            let (window_start, window_end) =
                block_window(&blocks, block_index, start_index, end_index, &start, &end);
            windows.push((blocks[block_index].path.clone(), window_start, window_end));
        }
        Ok(windows)
    }

    fn toggle_format(&mut self, format: Format) -> Result<(), CommandError> {
        let range = self.spanned_range()?;
        let windows = self.range_windows(&range)?;
        let offset_range = offset_range_from_windows(&windows);
        let formatted = resolver::is_formatted(&self.doc, &self.schema, &range, format);

        self.mutate(|engine| {
            if formatted {
                engine.unwrap_spans(&windows, &|el| format.matches(el))?;
            } else {
                engine.wrap_windows(&windows, &|children| {
                    Node::element(format.span_kind(), children)
                })?;
            }
            Ok(Some(offset_range))
        })
    }

    fn style_format(&mut self, format: Format, value: &str) -> Result<(), CommandError> {
        let range = self.spanned_range()?;
        let windows = self.range_windows(&range)?;
        let offset_range = offset_range_from_windows(&windows);
        let attr = format
            .value_attr()
            .ok_or_else(|| CommandError::new("Format carries no value attribute"))?;
        let value = value.to_string();

        self.mutate(|engine| {
            engine.wrap_windows(&windows, &|children| {
                let mut attrs = Attrs::default();
                attrs.insert(attr.to_string(), Value::String(value.clone()));
                Node::Element(ElementNode {
                    kind: format.span_kind().to_string(),
                    attrs,
                    children,
                })
            })?;
            Ok(Some(offset_range))
        })
    }

    fn remove_format(&mut self) -> Result<(), CommandError> {
        let range = self.spanned_range()?;
        let windows = self.range_windows(&range)?;
        let offset_range = offset_range_from_windows(&windows);

        self.mutate(|engine| {
            let schema = engine.schema.clone();
            engine.unwrap_spans(&windows, &|el| schema.is_inline_span(&el.kind))?;
            Ok(Some(offset_range))
        })
    }

    /// Alignment is block-wide: only the nearest block ancestor of the
    /// range start is touched. No block ancestor means a no-op success.
    fn justify(&mut self, align: &str) -> Result<(), CommandError> {
        let range = self.required_range()?;
        let (start, _) = range.ordered();
        let Some(block_path) = nearest_block_ancestor(&self.doc, &self.schema, &start.path) else {
            return Ok(());
        };
        let align = align.to_string();

        self.mutate(|engine| {
            let node = node_at_path_mut(&mut engine.doc, &block_path)?;
            if let Node::Element(el) = node {
                if align == "left" {
                    el.attrs.remove("align");
                } else {
                    el.attrs.insert("align".to_string(), Value::String(align));
                }
            }
            Ok(None)
        })
    }

    fn adjust_indent(&mut self, delta: i64) -> Result<(), CommandError> {
        let range = self.required_range()?;
        let (start, _) = range.ordered();
        let Some(block_path) = nearest_block_ancestor(&self.doc, &self.schema, &start.path) else {
            return Ok(());
        };

        self.mutate(|engine| {
            let node = node_at_path_mut(&mut engine.doc, &block_path)?;
            if let Node::Element(el) = node {
                let current = el.attrs.get("indent").and_then(|v| v.as_u64()).unwrap_or(0);
                let next = current
                    .saturating_add_signed(delta)
                    .min(MAX_INDENT_LEVEL);
                if next == 0 {
                    el.attrs.remove("indent");
                } else {
                    el.attrs
                        .insert("indent".to_string(), Value::Number(next.into()));
                }
            }
            Ok(None)
        })
    }

    fn toggle_list(&mut self, list_type: &str) -> Result<(), CommandError> {
        let range = self.required_range()?;
        let (start, _) = range.ordered();
        let list_type = list_type.to_string();

        if let Some(list_path) = nearest_ancestor_of_kind(&self.doc, &start.path, "list") {
            let same_type = node_at_path(&self.doc, &list_path)
                .and_then(Node::as_element)
                .and_then(|el| el.attrs.get("list_type"))
                .and_then(|v| v.as_str())
                == Some(list_type.as_str());

            return self.mutate(|engine| {
                if same_type {
                    engine.dissolve_list(&list_path)?;
                } else {
                    let node = node_at_path_mut(&mut engine.doc, &list_path)?;
                    if let Node::Element(el) = node {
                        el.attrs
                            .insert("list_type".to_string(), Value::String(list_type));
                    }
                }
                Ok(None)
            });
        }

        let block_path = nearest_block_ancestor(&self.doc, &self.schema, &start.path)
            .ok_or_else(|| CommandError::new("No active block"))?;

        self.mutate(|engine| {
            let old = remove_node(&mut engine.doc, &block_path)?;
            let Node::Element(el) = old else {
                return Err(CommandError::new("Active block is not an element"));
            };
            let item = Node::Element(ElementNode {
                kind: "list_item".to_string(),
                attrs: el.attrs,
                children: el.children,
            });
            let mut attrs = Attrs::default();
            attrs.insert("list_type".to_string(), Value::String(list_type));
            let list = Node::Element(ElementNode {
                kind: "list".to_string(),
                attrs,
                children: vec![item],
            });
            insert_node(&mut engine.doc, &block_path, list)?;
            Ok(None)
        })
    }

    /// Promote each item's content to a paragraph in place of the list,
    /// preserving order.
    fn dissolve_list(&mut self, list_path: &[usize]) -> Result<(), CommandError> {
        let removed = remove_node(&mut self.doc, list_path)?;
        let Node::Element(list) = removed else {
            return Err(CommandError::new("Not a list"));
        };
        let (ix, parent_path) = list_path
            .split_last()
            .ok_or_else(|| CommandError::new("Empty list path"))?;
        let siblings = children_at_path_mut(&mut self.doc, parent_path)?;
        for (offset, item) in list.children.into_iter().enumerate() {
            let block = match item {
                Node::Element(item_el) => {
                    let mut attrs = item_el.attrs;
                    attrs.remove("list_type");
                    Node::Element(ElementNode {
                        kind: "paragraph".to_string(),
                        attrs,
                        children: item_el.children,
                    })
                }
                text @ Node::Text(_) => Node::Element(ElementNode {
                    kind: "paragraph".to_string(),
                    attrs: Attrs::default(),
                    children: vec![text],
                }),
            };
            siblings.insert(ix + offset, block);
        }
        Ok(())
    }

    /// Rebuild the nearest block with the requested tag; children and
    /// position are preserved exactly.
    fn format_block(&mut self, tag: &str) -> Result<(), CommandError> {
        let tag = tag.trim().trim_matches(['<', '>']).to_ascii_lowercase();
        let (kind, level): (&str, Option<u64>) = match tag.as_str() {
            "p" => ("paragraph", None),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                ("heading", tag[1..].parse::<u64>().ok())
            }
            "blockquote" => ("blockquote", None),
            "pre" => ("code_block", None),
            _ => return Err(CommandError::new(format!("Unsupported block tag: {tag}"))),
        };

        let range = self.required_range()?;
        let (start, _) = range.ordered();
        let block_path = nearest_block_ancestor(&self.doc, &self.schema, &start.path)
            .ok_or_else(|| CommandError::new("No active block"))?;

        self.mutate(|engine| {
            let old = remove_node(&mut engine.doc, &block_path)?;
            let Node::Element(el) = old else {
                return Err(CommandError::new("Active block is not an element"));
            };
            let mut attrs = el.attrs;
            attrs.remove("level");
            attrs.remove("list_type");
            if let Some(level) = level {
                attrs.insert("level".to_string(), Value::Number(level.into()));
            }
            let next = Node::Element(ElementNode {
                kind: kind.to_string(),
                attrs,
                children: el.children,
            });
            insert_node(&mut engine.doc, &block_path, next)?;
            Ok(None)
        })
    }

    fn insert_horizontal_rule(&mut self) -> Result<(), CommandError> {
        let range = self.required_range()?;
        let (start, _) = range.ordered();
        let block_path = nearest_block_ancestor(&self.doc, &self.schema, &start.path)
            .ok_or_else(|| CommandError::new("No active block"))?;
        let (block_ix, parent_path) = block_path
            .split_last()
            .map(|(ix, p)| (*ix, p.to_vec()))
            .ok_or_else(|| CommandError::new("No active block"))?;

        self.mutate(|engine| {
            let mut divider_path = parent_path.clone();
            divider_path.push(block_ix + 1);
            insert_node(&mut engine.doc, &divider_path, Node::divider())?;

            let mut paragraph_path = parent_path.clone();
            paragraph_path.push(block_ix + 2);
            insert_node(&mut engine.doc, &paragraph_path, Node::paragraph(""))?;

            Ok(Some(OffsetRange::collapsed(paragraph_path, 0)))
        })
    }

    fn insert_text(&mut self, text: &str) -> Result<(), CommandError> {
        let range = self.required_range()?;
        let text = text.to_string();

        self.mutate(|engine| {
            let (block_path, caret) = engine.delete_range_contents(&range)?;
            let children = children_at_path(&engine.doc, &block_path)
                .ok_or_else(|| CommandError::new("Caret block vanished"))?;
            let point = point_for_global_offset(&block_path, children, caret);
            match node_at_path_mut(&mut engine.doc, &point.path) {
                Ok(Node::Text(leaf)) => {
                    let offset = clamp_to_char_boundary(&leaf.text, point.offset);
                    leaf.text.insert_str(offset, &text);
                }
                _ => {
                    // Block with no text leaf yet.
                    let siblings = children_at_path_mut(&mut engine.doc, &block_path)?;
                    siblings.insert(0, Node::text(text.clone()));
                }
            }
            Ok(Some(OffsetRange::collapsed(block_path, caret + text.len())))
        })
    }

    fn insert_markup(&mut self, value: &str) -> Result<(), CommandError> {
        let range = self.required_range()?;
        let fragment = markup::parse_fragment(value);
        if fragment.is_empty() {
            // Nothing survived sanitization.
            return Ok(());
        }

        let inline_only = fragment.iter().all(|node| match node {
            Node::Text(_) => true,
            Node::Element(el) => self.schema.is_inline_span(&el.kind),
        });

        if inline_only {
            self.mutate(|engine| {
                let (block_path, caret) = engine.delete_range_contents(&range)?;
                let inserted_len = inline_text_len(&fragment);
                let children = children_at_path_mut(&mut engine.doc, &block_path)?;
                let old = std::mem::take(children);
                let mut cursor = 0usize;
                let (mut left, right) = split_inline(&old, &mut cursor, caret);
                left.extend(fragment);
                left.extend(right);
                *children = left;
                Ok(Some(OffsetRange::collapsed(block_path, caret + inserted_len)))
            })
        } else {
            let blocks = markup::parse(value).children;
            self.mutate(|engine| {
                let (block_path, caret) = engine.delete_range_contents(&range)?;
                let (block_ix, parent_path) = block_path
                    .split_last()
                    .map(|(ix, p)| (*ix, p.to_vec()))
                    .ok_or_else(|| CommandError::new("Caret block vanished"))?;

                // Split the caret block at the caret: the head stays put,
                // the tail becomes a trailing block of the same kind, and
                // the fragment lands between them.
                let mut insert_at = block_ix + 1;
                let mut tail_block = None;
                {
                    let Ok(Node::Element(el)) = node_at_path_mut(&mut engine.doc, &block_path)
                    else {
                        return Err(CommandError::new("Caret block vanished"));
                    };
                    let old = std::mem::take(&mut el.children);
                    let mut cursor = 0usize;
                    let (head, tail) = split_inline(&old, &mut cursor, caret);
                    if inline_text_len(&head) == 0 && inline_text_len(&tail) > 0 {
                        // Caret at the block start: keep the block whole
                        // and insert in front of it.
                        el.children = tail;
                        insert_at = block_ix;
                    } else {
                        el.children = head;
                        if inline_text_len(&tail) > 0 {
                            tail_block = Some(Node::Element(ElementNode {
                                kind: el.kind.clone(),
                                attrs: el.attrs.clone(),
                                children: tail,
                            }));
                        }
                    }
                }

                let count = blocks.len();
                for (offset, block) in blocks.into_iter().enumerate() {
                    let mut path = parent_path.clone();
                    path.push(insert_at + offset);
                    insert_node(&mut engine.doc, &path, block)?;
                }
                if let Some(tail) = tail_block {
                    let mut tail_path = parent_path.clone();
                    tail_path.push(insert_at + count);
                    insert_node(&mut engine.doc, &tail_path, tail)?;
                }

                let mut last_path = parent_path.clone();
                last_path.push(insert_at + count - 1);
                let end = children_at_path(&engine.doc, &last_path)
                    .map(inline_text_len)
                    .unwrap_or(0);
                Ok(Some(OffsetRange::collapsed(last_path, end)))
            })
        }
    }

    /// Delete the contents of a range and return the collapsed caret as a
    /// (block path, global offset) pair. Collapsed input is a no-op.
    fn delete_range_contents(&mut self, range: &Range) -> Result<(Path, usize), CommandError> {
        let windows = self.range_windows(range)?;
        let (first_path, first_start, _) = windows
            .first()
            .cloned()
            .ok_or_else(|| CommandError::new("Range is not in a text block"))?;

        if range.is_collapsed() {
            return Ok((first_path, first_start));
        }

        if windows.len() == 1 {
            let (path, ws, we) = &windows[0];
            let children = children_at_path_mut(&mut self.doc, path)?;
            let old = std::mem::take(children);
            let mut cursor = 0usize;
            *children = remove_window(&old, &mut cursor, *ws, *we);
            return Ok((path.clone(), *ws));
        }

        // Multi-block: truncate the first block's tail and the last
        // block's head, keep the last block's remainder to merge into the
        // first block, then drop everything in between (reverse document
        // order keeps earlier paths valid).
        let (last_path, _, last_end) = windows
            .last()
            .cloned()
            .ok_or_else(|| CommandError::new("Range is not in a text block"))?;

        {
            let children = children_at_path_mut(&mut self.doc, &first_path)?;
            let old = std::mem::take(children);
            let mut cursor = 0usize;
            *children = remove_window(&old, &mut cursor, first_start, usize::MAX);
        }

        let remainder = {
            let children = children_at_path_mut(&mut self.doc, &last_path)?;
            let old = std::mem::take(children);
            let mut cursor = 0usize;
            remove_window(&old, &mut cursor, 0, last_end)
        };

        for (path, _, _) in windows.iter().skip(1).rev() {
            remove_node(&mut self.doc, path)?;
        }

        let children = children_at_path_mut(&mut self.doc, &first_path)?;
        children.extend(remainder);

        Ok((first_path, first_start))
    }

    /// Wrap every window in a new format span. The fast path surrounds a
    /// contiguous sibling run under one parent; when the endpoints do not
    /// share a cleanly enclosable parent the per-leaf fallback wraps each
    /// intersecting text leaf individually, which always succeeds.
    fn wrap_windows(
        &mut self,
        windows: &[(Path, usize, usize)],
        make_span: &dyn Fn(Vec<Node>) -> Node,
    ) -> Result<(), CommandError> {
        for (path, ws, we) in windows {
            if ws >= we {
                continue;
            }
            if self.try_surround(path, *ws, *we, make_span)? {
                continue;
            }
            let children = children_at_path_mut(&mut self.doc, path)?;
            let old = std::mem::take(children);
            let mut cursor = 0usize;
            *children = wrap_leaves(&old, &mut cursor, *ws, *we, make_span);
        }
        Ok(())
    }

    fn try_surround(
        &mut self,
        block_path: &Path,
        ws: usize,
        we: usize,
        make_span: &dyn Fn(Vec<Node>) -> Node,
    ) -> Result<bool, CommandError> {
        let children = children_at_path(&self.doc, block_path)
            .ok_or_else(|| CommandError::new("Block vanished"))?;
        let p1 = point_for_global_offset(block_path, children, ws);
        let p2 = point_for_global_offset(block_path, children, we);
        let r1 = &p1.path[block_path.len()..];
        let r2 = &p2.path[block_path.len()..];
        if r1.is_empty() || r2.is_empty() {
            return Ok(false);
        }
        if r1[..r1.len() - 1] != r2[..r2.len() - 1] {
            return Ok(false);
        }

        let mut parent_path = block_path.clone();
        parent_path.extend_from_slice(&r1[..r1.len() - 1]);
        let (Some(&i1), Some(&i2)) = (r1.last(), r2.last()) else {
            return Ok(false);
        };
        let (o1, o2) = (p1.offset, p2.offset);

        let siblings = children_at_path_mut(&mut self.doc, &parent_path)?;

        if i1 == i2 {
            let Some(Node::Text(leaf)) = siblings.get(i1) else {
                return Ok(false);
            };
            if o1 >= o2 {
                return Ok(false);
            }
            let prefix = leaf.text.get(..o1).unwrap_or("").to_string();
            let middle = leaf.text.get(o1..o2).unwrap_or("").to_string();
            let suffix = leaf.text.get(o2..).unwrap_or("").to_string();
            siblings.remove(i1);
            let mut insert_at = i1;
            if !prefix.is_empty() {
                siblings.insert(insert_at, Node::text(prefix));
                insert_at += 1;
            }
            siblings.insert(insert_at, make_span(vec![Node::text(middle)]));
            insert_at += 1;
            if !suffix.is_empty() {
                siblings.insert(insert_at, Node::text(suffix));
            }
            return Ok(true);
        }

        let (mut i1, mut i2) = (i1.min(i2), i1.max(i2));

        // Start boundary: split off an uncovered prefix, or step past a
        // leaf the window only touches at its end.
        if let Some(Node::Text(leaf)) = siblings.get(i1) {
            if o1 >= leaf.text.len() {
                i1 += 1;
            } else if o1 > 0 {
                let prefix = leaf.text[..o1].to_string();
                let covered = leaf.text[o1..].to_string();
                siblings[i1] = Node::text(prefix);
                siblings.insert(i1 + 1, Node::text(covered));
                i1 += 1;
                i2 += 1;
            }
        }

        // End boundary: split off an uncovered suffix.
        if let Some(Node::Text(leaf)) = siblings.get(i2) {
            if o2 == 0 {
                if i2 == 0 {
                    return Ok(false);
                }
                i2 -= 1;
            } else if o2 < leaf.text.len() {
                let covered = leaf.text[..o2].to_string();
                let suffix = leaf.text[o2..].to_string();
                siblings[i2] = Node::text(covered);
                siblings.insert(i2 + 1, Node::text(suffix));
            }
        }

        if i1 > i2 || i2 >= siblings.len() {
            return Ok(false);
        }

        let run: Vec<Node> = siblings.drain(i1..=i2).collect();
        siblings.insert(i1, make_span(run));
        Ok(true)
    }

    /// Unwrap every span matching `pred` that encloses a leaf intersecting
    /// one of the windows. Deepest-last paths are processed first so
    /// earlier paths stay valid.
    fn unwrap_spans(
        &mut self,
        windows: &[(Path, usize, usize)],
        pred: &dyn Fn(&ElementNode) -> bool,
    ) -> Result<(), CommandError> {
        let mut targets: std::collections::BTreeSet<Path> = std::collections::BTreeSet::new();
        for (path, ws, we) in windows {
            if ws >= we {
                continue;
            }
            let children = children_at_path(&self.doc, path)
                .ok_or_else(|| CommandError::new("Block vanished"))?;
            let mut cursor = 0usize;
            let mut stack: Vec<Path> = Vec::new();
            collect_spans(
                children,
                &mut cursor,
                *ws,
                *we,
                pred,
                &mut path.clone(),
                &mut stack,
                &mut targets,
            );
        }

        for path in targets.iter().rev() {
            unwrap_node(&mut self.doc, path)?;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        // Bounded fixpoint; each pass is monotone so a handful of rounds
        // always converges.
        for _ in 0..10 {
            let mut changed = false;
            changed |= ensure_non_empty_document(&mut self.doc);
            changed |= split_invalid_list_children(&mut self.doc);
            changed |= remove_empty_lists(&mut self.doc);
            changed |= drop_empty_spans(&mut self.doc, &self.schema);
            changed |= ensure_text_blocks_have_leaf(&mut self.doc, &self.schema);
            changed |= merge_adjacent_text_leaves(&mut self.doc);
            if !changed {
                break;
            }
        }
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn string_value<'a>(command: &str, value: Option<&'a Value>) -> Result<&'a str, CommandError> {
    value
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::new(format!("Command {command} requires a string value")))
}

fn offset_range_from_windows(windows: &[(Path, usize, usize)]) -> OffsetRange {
    let (first_path, first_start, first_end) =
        windows.first().cloned().unwrap_or((vec![0], 0, 0));
    let (last_path, _, last_end) = windows.last().cloned().unwrap_or((
        first_path.clone(),
        first_start,
        first_end,
    ));
    OffsetRange {
        start_block: first_path,
        start: first_start,
        end_block: last_path,
        end: last_end,
    }
}

fn wrap_leaves(
    nodes: &[Node],
    cursor: &mut usize,
    ws: usize,
    we: usize,
    make_span: &dyn Fn(Vec<Node>) -> Node,
) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::new();
    for node in nodes {
        match node {
            Node::Text(t) => {
                let node_start = *cursor;
                let node_end = node_start + t.text.len();
                *cursor = node_end;
                if we <= node_start || ws >= node_end {
                    out.push(node.clone());
                    continue;
                }
                let sel_start =
                    clamp_to_char_boundary(&t.text, ws.saturating_sub(node_start));
                let sel_end = clamp_to_char_boundary(
                    &t.text,
                    we.saturating_sub(node_start).min(t.text.len()),
                );
                let prefix = t.text.get(..sel_start).unwrap_or("").to_string();
                let middle = t.text.get(sel_start..sel_end).unwrap_or("").to_string();
                let suffix = t.text.get(sel_end..).unwrap_or("").to_string();
                if !prefix.is_empty() {
                    out.push(Node::text(prefix));
                }
                if !middle.is_empty() {
                    out.push(make_span(vec![Node::text(middle)]));
                }
                if !suffix.is_empty() {
                    out.push(Node::text(suffix));
                }
            }
            Node::Element(el) => {
                out.push(Node::Element(ElementNode {
                    kind: el.kind.clone(),
                    attrs: el.attrs.clone(),
                    children: wrap_leaves(&el.children, cursor, ws, we, make_span),
                }));
            }
        }
    }
    out
}

fn remove_window(nodes: &[Node], cursor: &mut usize, ws: usize, we: usize) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::new();
    for node in nodes {
        match node {
            Node::Text(t) => {
                let node_start = *cursor;
                let node_end = node_start + t.text.len();
                *cursor = node_end;
                if we <= node_start || ws >= node_end {
                    out.push(node.clone());
                    continue;
                }
                let sel_start =
                    clamp_to_char_boundary(&t.text, ws.saturating_sub(node_start));
                let sel_end = clamp_to_char_boundary(
                    &t.text,
                    we.saturating_sub(node_start).min(t.text.len()),
                );
                let mut kept = t.text.get(..sel_start).unwrap_or("").to_string();
                kept.push_str(t.text.get(sel_end..).unwrap_or(""));
                if !kept.is_empty() {
                    out.push(Node::text(kept));
                }
            }
            Node::Element(el) => {
                out.push(Node::Element(ElementNode {
                    kind: el.kind.clone(),
                    attrs: el.attrs.clone(),
                    children: remove_window(&el.children, cursor, ws, we),
                }));
            }
        }
    }
    out
}

fn split_inline(nodes: &[Node], cursor: &mut usize, at: usize) -> (Vec<Node>, Vec<Node>) {
    let mut left: Vec<Node> = Vec::new();
    let mut right: Vec<Node> = Vec::new();
    for node in nodes {
        match node {
            Node::Text(t) => {
                let node_start = *cursor;
                let node_end = node_start + t.text.len();
                *cursor = node_end;
                if node_end <= at {
                    left.push(node.clone());
                } else if node_start >= at {
                    right.push(node.clone());
                } else {
                    let split = clamp_to_char_boundary(&t.text, at - node_start);
                    let head = t.text[..split].to_string();
                    let tail = t.text[split..].to_string();
                    if !head.is_empty() {
                        left.push(Node::text(head));
                    }
                    if !tail.is_empty() {
                        right.push(Node::text(tail));
                    }
                }
            }
            Node::Element(el) => {
                let len = inline_text_len(&el.children);
                let node_start = *cursor;
                if node_start + len <= at {
                    *cursor += len;
                    left.push(node.clone());
                } else if node_start >= at {
                    *cursor += len;
                    right.push(node.clone());
                } else {
                    let (l, r) = split_inline(&el.children, cursor, at);
                    if !l.is_empty() {
                        left.push(Node::Element(ElementNode {
                            kind: el.kind.clone(),
                            attrs: el.attrs.clone(),
                            children: l,
                        }));
                    }
                    if !r.is_empty() {
                        right.push(Node::Element(ElementNode {
                            kind: el.kind.clone(),
                            attrs: el.attrs.clone(),
                            children: r,
                        }));
                    }
                }
            }
        }
    }
    (left, right)
}

#[allow(clippy::too_many_arguments)]
fn collect_spans(
    nodes: &[Node],
    cursor: &mut usize,
    ws: usize,
    we: usize,
    pred: &dyn Fn(&ElementNode) -> bool,
    path: &mut Path,
    stack: &mut Vec<Path>,
    out: &mut std::collections::BTreeSet<Path>,
) {
    for (ix, node) in nodes.iter().enumerate() {
        match node {
            Node::Text(t) => {
                let node_start = *cursor;
                let node_end = node_start + t.text.len();
                *cursor = node_end;
                if we <= node_start || ws >= node_end {
                    continue;
                }
                for span_path in stack.iter() {
                    out.insert(span_path.clone());
                }
            }
            Node::Element(el) => {
                path.push(ix);
                let matched = pred(el);
                if matched {
                    stack.push(path.clone());
                }
                collect_spans(&el.children, cursor, ws, we, pred, path, stack, out);
                if matched {
                    stack.pop();
                }
                path.pop();
            }
        }
    }
}

fn ensure_non_empty_document(doc: &mut Document) -> bool {
    if doc.children.is_empty() {
        doc.children.push(Node::paragraph(""));
        return true;
    }
    false
}

/// Lists may only contain list items; anything else is promoted out,
/// splitting the list around it.
fn split_invalid_list_children(doc: &mut Document) -> bool {
    fn walk(nodes: &mut Vec<Node>) -> bool {
        let mut changed = false;
        let mut ix = 0usize;
        while ix < nodes.len() {
            let Node::Element(el) = &mut nodes[ix] else {
                ix += 1;
                continue;
            };
            if el.kind != "list" {
                changed |= walk(&mut el.children);
                ix += 1;
                continue;
            }
            let Some(bad_ix) = el
                .children
                .iter()
                .position(|n| !matches!(n, Node::Element(item) if item.kind == "list_item"))
            else {
                ix += 1;
                continue;
            };

            let attrs = el.attrs.clone();
            let kind = el.kind.clone();
            let stray = el.children.remove(bad_ix);
            let tail: Vec<Node> = el.children.drain(bad_ix..).collect();

            nodes.insert(ix + 1, stray);
            if !tail.is_empty() {
                nodes.insert(
                    ix + 2,
                    Node::Element(ElementNode {
                        kind,
                        attrs,
                        children: tail,
                    }),
                );
            }
            changed = true;
        }
        changed
    }

    walk(&mut doc.children)
}

fn remove_empty_lists(doc: &mut Document) -> bool {
    fn walk(nodes: &mut Vec<Node>) -> bool {
        let mut changed = false;
        nodes.retain(|n| !matches!(n, Node::Element(el) if el.kind == "list" && el.children.is_empty()));
        for node in nodes.iter_mut() {
            if let Node::Element(el) = node {
                changed |= walk(&mut el.children);
            }
        }
        changed
    }

    fn count_lists(nodes: &[Node]) -> usize {
        nodes
            .iter()
            .map(|n| match n {
                Node::Element(el) => {
                    usize::from(el.kind == "list" && el.children.is_empty())
                        + count_lists(&el.children)
                }
                Node::Text(_) => 0,
            })
            .sum()
    }

    let before = count_lists(&doc.children);
    walk(&mut doc.children);
    before > 0
}

/// Format spans that no longer carry any text are dropped.
fn drop_empty_spans(doc: &mut Document, schema: &Schema) -> bool {
    fn walk(nodes: &mut Vec<Node>, schema: &Schema) -> bool {
        let mut changed = false;
        let before = nodes.len();
        nodes.retain(|n| {
            !matches!(n, Node::Element(el)
                if schema.is_inline_span(&el.kind) && inline_text_len(&el.children) == 0)
        });
        changed |= nodes.len() != before;
        for node in nodes.iter_mut() {
            if let Node::Element(el) = node {
                changed |= walk(&mut el.children, schema);
            }
        }
        changed
    }

    walk(&mut doc.children, schema)
}

fn ensure_text_blocks_have_leaf(doc: &mut Document, schema: &Schema) -> bool {
    fn walk(nodes: &mut Vec<Node>, schema: &Schema) -> bool {
        let mut changed = false;
        for node in nodes.iter_mut() {
            let Node::Element(el) = node else {
                continue;
            };
            if schema.is_text_block(&el.kind) {
                if el.children.is_empty() {
                    el.children.push(Node::text(""));
                    changed = true;
                }
            } else {
                changed |= walk(&mut el.children, schema);
            }
        }
        changed
    }

    walk(&mut doc.children, schema)
}

fn merge_adjacent_text_leaves(doc: &mut Document) -> bool {
    fn walk(nodes: &mut Vec<Node>) -> bool {
        let mut changed = false;
        let mut ix = 0usize;
        while ix + 1 < nodes.len() {
            let mergeable = matches!(
                (&nodes[ix], &nodes[ix + 1]),
                (Node::Text(_), Node::Text(_))
            );
            if mergeable {
                let Node::Text(right) = nodes.remove(ix + 1) else {
                    unreachable!("checked above");
                };
                let Node::Text(left) = &mut nodes[ix] else {
                    unreachable!("checked above");
                };
                left.text.push_str(&right.text);
                changed = true;
            } else {
                ix += 1;
            }
        }
        for node in nodes.iter_mut() {
            if let Node::Element(el) = node {
                changed |= walk(&mut el.children);
            }
        }
        changed
    }

    walk(&mut doc.children)
}
