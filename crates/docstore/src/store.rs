use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use vellum_engine_core::{Channel, markup};

const INDEX_KEY: &str = "vellum.docs";
const DOC_KEY_PREFIX: &str = "vellum.doc.";
const PREVIEW_CHARS: usize = 80;
const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Opaque string key-value persistence. `set` may fail (quota); readers
/// never do.
pub trait Storage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str);
}

/// In-memory storage, the default backend and the one tests use. An
/// optional byte budget simulates quota exhaustion.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
    byte_budget: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_budget(byte_budget: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            byte_budget: Some(byte_budget),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(budget) = self.byte_budget {
            let existing = self
                .entries
                .get(key)
                .map(|v| key.len() + v.len())
                .unwrap_or(0);
            let next = self.used_bytes() - existing + key.len() + value.len();
            if next > budget {
                return Err(StorageError::new(format!(
                    "Storage budget exceeded: {next} > {budget} bytes"
                )));
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub word_count: usize,
    pub character_count: usize,
    pub reading_time_minutes: usize,
}

impl Metadata {
    /// Derive counts from serialized content. Words are whitespace-split
    /// tokens of the plain text; reading time assumes 200 words a minute
    /// and is never below one minute.
    pub fn from_content(content: &str) -> Self {
        let doc = markup::parse(content);
        let text = markup::plain_text(&doc);
        let word_count = text.split_whitespace().count();
        Self {
            word_count,
            character_count: text.chars().count(),
            reading_time_minutes: word_count.div_ceil(WORDS_PER_MINUTE).max(1),
        }
    }
}

/// One open document: serialized content, a linear content history and the
/// cursor into it. Invariants: `-1 <= history_index < history.len()` and,
/// once any update committed, `content == history[history_index]`. A fresh
/// document has an empty history and index -1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub name: String,
    pub content: String,
    pub history: Vec<String>,
    pub history_index: isize,
    pub metadata: Metadata,
    pub last_modified: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub last_modified: u64,
    pub word_count: usize,
    pub preview: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    DocumentCreated { id: String },
    DocumentUpdated { id: String },
    DocumentRenamed { id: String, name: String },
    DocumentDeleted { id: String },
    DocumentDuplicated { source_id: String, id: String },
    DocumentUndone { id: String },
    DocumentRedone { id: String },
    CurrentDocumentChanged { id: Option<String> },
    StorageError { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StoreIndex {
    ids: Vec<String>,
    next_id: u64,
    current: Option<String>,
}

/// Multi-document store with content-level history, derived metadata and
/// write-through persistence. Storage failures are reported as events and
/// never roll back in-memory state.
pub struct DocumentStore<S: Storage> {
    storage: S,
    documents: BTreeMap<String, StoredDocument>,
    order: Vec<String>,
    next_id: u64,
    current: Option<String>,
    events: Channel<StoreEvent>,
}

impl<S: Storage> DocumentStore<S> {
    /// Rebuild the store from persisted state; unreadable entries are
    /// skipped rather than failing the load.
    pub fn load(storage: S) -> Self {
        let index: StoreIndex = storage
            .get(INDEX_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let mut documents = BTreeMap::new();
        let mut order = Vec::new();
        for id in &index.ids {
            let Some(raw) = storage.get(&doc_key(id)) else {
                continue;
            };
            let Ok(doc) = serde_json::from_str::<StoredDocument>(&raw) else {
                continue;
            };
            order.push(id.clone());
            documents.insert(id.clone(), doc);
        }

        let current = index
            .current
            .filter(|id| documents.contains_key(id))
            .or_else(|| order.first().cloned());

        Self {
            storage,
            documents,
            order,
            next_id: index.next_id,
            current,
            events: Channel::new(),
        }
    }

    pub fn events_mut(&mut self) -> &mut Channel<StoreEvent> {
        &mut self.events
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn document(&self, id: &str) -> Option<&StoredDocument> {
        self.documents.get(id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_document(&self) -> Option<&StoredDocument> {
        self.current.as_deref().and_then(|id| self.documents.get(id))
    }

    pub fn create_document(&mut self, options: CreateOptions) -> String {
        self.next_id += 1;
        let id = format!("doc-{}", self.next_id);
        let content = options.content.unwrap_or_default();
        let doc = StoredDocument {
            id: id.clone(),
            name: options.name.unwrap_or_else(|| "Untitled".to_string()),
            metadata: Metadata::from_content(&content),
            content,
            history: Vec::new(),
            history_index: -1,
            last_modified: now_millis(),
        };
        self.order.push(id.clone());
        self.documents.insert(id.clone(), doc);
        if self.current.is_none() {
            self.current = Some(id.clone());
            self.events.emit(&StoreEvent::CurrentDocumentChanged {
                id: Some(id.clone()),
            });
        }
        self.persist_document(&id);
        self.persist_index();
        self.events.emit(&StoreEvent::DocumentCreated { id: id.clone() });
        id
    }

    /// Commit new content: the redo tail is dropped, the previous and new
    /// content land on top of the history (deduplicated), and the index
    /// points at the top. False for unknown ids.
    pub fn update_document_content(&mut self, id: &str, content: &str) -> bool {
        let Some(doc) = self.documents.get_mut(id) else {
            return false;
        };

        let previous = std::mem::replace(&mut doc.content, content.to_string());
        if doc.history_index >= 0 {
            doc.history.truncate(doc.history_index as usize + 1);
        } else {
            doc.history.clear();
        }
        if doc.history.last() != Some(&previous) {
            doc.history.push(previous);
        }
        if doc.history.last().map(String::as_str) != Some(content) {
            doc.history.push(content.to_string());
        }
        doc.history_index = doc.history.len() as isize - 1;
        doc.metadata = Metadata::from_content(content);
        doc.last_modified = now_millis();

        self.persist_document(id);
        self.events
            .emit(&StoreEvent::DocumentUpdated { id: id.to_string() });
        true
    }

    pub fn undo_document(&mut self, id: &str) -> bool {
        let Some(doc) = self.documents.get_mut(id) else {
            return false;
        };
        if doc.history_index <= 0 {
            return false;
        }
        doc.history_index -= 1;
        doc.content = doc.history[doc.history_index as usize].clone();
        doc.metadata = Metadata::from_content(&doc.content);
        doc.last_modified = now_millis();

        self.persist_document(id);
        self.events
            .emit(&StoreEvent::DocumentUndone { id: id.to_string() });
        true
    }

    pub fn redo_document(&mut self, id: &str) -> bool {
        let Some(doc) = self.documents.get_mut(id) else {
            return false;
        };
        if doc.history_index < 0 || doc.history_index as usize + 1 >= doc.history.len() {
            return false;
        }
        doc.history_index += 1;
        doc.content = doc.history[doc.history_index as usize].clone();
        doc.metadata = Metadata::from_content(&doc.content);
        doc.last_modified = now_millis();

        self.persist_document(id);
        self.events
            .emit(&StoreEvent::DocumentRedone { id: id.to_string() });
        true
    }

    pub fn rename_document(&mut self, id: &str, name: &str) -> bool {
        let Some(doc) = self.documents.get_mut(id) else {
            return false;
        };
        doc.name = name.to_string();
        doc.last_modified = now_millis();

        self.persist_document(id);
        self.events.emit(&StoreEvent::DocumentRenamed {
            id: id.to_string(),
            name: name.to_string(),
        });
        true
    }

    /// Remove a document and its persisted state. Terminal: there is no
    /// undelete. When the current document is deleted the pointer moves to
    /// the first remaining document, if any.
    pub fn delete_document(&mut self, id: &str) -> bool {
        if self.documents.remove(id).is_none() {
            return false;
        }
        self.order.retain(|d| d != id);
        self.storage.remove(&doc_key(id));

        if self.current.as_deref() == Some(id) {
            self.current = self.order.first().cloned();
            self.events.emit(&StoreEvent::CurrentDocumentChanged {
                id: self.current.clone(),
            });
        }

        self.persist_index();
        self.events
            .emit(&StoreEvent::DocumentDeleted { id: id.to_string() });
        true
    }

    /// Deep copy of content, history and metadata under a new id. The
    /// copies are fully independent afterwards.
    pub fn duplicate_document(&mut self, id: &str) -> Option<String> {
        let source = self.documents.get(id)?.clone();
        self.next_id += 1;
        let new_id = format!("doc-{}", self.next_id);
        let copy = StoredDocument {
            id: new_id.clone(),
            name: format!("Copy of {}", source.name),
            last_modified: now_millis(),
            ..source
        };
        self.order.push(new_id.clone());
        self.documents.insert(new_id.clone(), copy);

        self.persist_document(&new_id);
        self.persist_index();
        self.events.emit(&StoreEvent::DocumentDuplicated {
            source_id: id.to_string(),
            id: new_id.clone(),
        });
        Some(new_id)
    }

    /// Flush the outgoing current document, then move the pointer.
    pub fn set_current_document(&mut self, id: &str) -> bool {
        if !self.documents.contains_key(id) {
            return false;
        }
        if self.current.as_deref() == Some(id) {
            return true;
        }
        if let Some(outgoing) = self.current.clone() {
            self.persist_document(&outgoing);
        }
        self.current = Some(id.to_string());
        self.persist_index();
        self.events.emit(&StoreEvent::CurrentDocumentChanged {
            id: Some(id.to_string()),
        });
        true
    }

    /// Case-insensitive substring match over names and plain text. Returns
    /// the matching documents in list order; an empty query matches all.
    pub fn search_documents(&self, query: &str) -> Vec<StoredDocument> {
        let needle = query.trim().to_lowercase();
        self.order
            .iter()
            .filter_map(|id| self.documents.get(id))
            .filter(|doc| {
                if needle.is_empty() {
                    return true;
                }
                if doc.name.to_lowercase().contains(&needle) {
                    return true;
                }
                let text = markup::plain_text(&markup::parse(&doc.content));
                text.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub fn document_list(&self) -> Vec<DocumentSummary> {
        self.order
            .iter()
            .filter_map(|id| self.documents.get(id))
            .map(summarize)
            .collect()
    }

    fn persist_document(&mut self, id: &str) {
        let Some(doc) = self.documents.get(id) else {
            return;
        };
        let payload = match serde_json::to_string(doc) {
            Ok(payload) => payload,
            Err(err) => {
                self.events.emit(&StoreEvent::StorageError {
                    message: err.to_string(),
                });
                return;
            }
        };
        if let Err(err) = self.storage.set(&doc_key(id), &payload) {
            self.events.emit(&StoreEvent::StorageError {
                message: err.message().to_string(),
            });
        }
    }

    fn persist_index(&mut self) {
        let index = StoreIndex {
            ids: self.order.clone(),
            next_id: self.next_id,
            current: self.current.clone(),
        };
        let payload = match serde_json::to_string(&index) {
            Ok(payload) => payload,
            Err(err) => {
                self.events.emit(&StoreEvent::StorageError {
                    message: err.to_string(),
                });
                return;
            }
        };
        if let Err(err) = self.storage.set(INDEX_KEY, &payload) {
            self.events.emit(&StoreEvent::StorageError {
                message: err.message().to_string(),
            });
        }
    }
}

fn doc_key(id: &str) -> String {
    format!("{DOC_KEY_PREFIX}{id}")
}

fn summarize(doc: &StoredDocument) -> DocumentSummary {
    let text = markup::plain_text(&markup::parse(&doc.content));
    DocumentSummary {
        id: doc.id.clone(),
        name: doc.name.clone(),
        last_modified: doc.last_modified,
        word_count: doc.metadata.word_count,
        preview: text.chars().take(PREVIEW_CHARS).collect(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
