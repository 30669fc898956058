use serde_json::Value;
use vellum_engine_core::{CommandEngine, Range};

use crate::store::{CreateOptions, DocumentStore, MemoryStorage, Storage, StoredDocument};

/// Composition root: one engine, one store, one storage backend. Command
/// results flow one way, engine -> store; the store's content history is
/// the durable one, the engine history only spans the focused document.
pub struct Workspace<S: Storage> {
    engine: CommandEngine,
    store: DocumentStore<S>,
}

impl Workspace<MemoryStorage> {
    pub fn in_memory() -> Self {
        Self::load(MemoryStorage::new())
    }
}

impl<S: Storage> Workspace<S> {
    pub fn load(storage: S) -> Self {
        let store = DocumentStore::load(storage);
        let mut engine = CommandEngine::new();
        if let Some(doc) = store.current_document() {
            engine.load(&doc.content);
        }
        Self { engine, store }
    }

    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CommandEngine {
        &mut self.engine
    }

    pub fn store(&self) -> &DocumentStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DocumentStore<S> {
        &mut self.store
    }

    pub fn current_document(&self) -> Option<&StoredDocument> {
        self.store.current_document()
    }

    /// Create a document; the first one created is focused automatically.
    pub fn create_document(&mut self, options: CreateOptions) -> String {
        let had_current = self.store.current_id().is_some();
        let id = self.store.create_document(options);
        if !had_current {
            if let Some(doc) = self.store.document(&id) {
                let content = doc.content.clone();
                self.engine.load(&content);
            }
        }
        id
    }

    /// Focus a document: the outgoing document's edits are flushed into
    /// its store history first, then the engine reloads from the incoming
    /// content and the range resets.
    pub fn open_document(&mut self, id: &str) -> bool {
        if self.store.document(id).is_none() {
            return false;
        }
        if let Some(current) = self.store.current_id().map(str::to_string) {
            if current != id {
                let content = self.engine.content();
                let stored = self.store.document(&current).map(|d| d.content.as_str());
                if stored != Some(content.as_str()) {
                    self.store.update_document_content(&current, &content);
                }
            }
        }
        if !self.store.set_current_document(id) {
            return false;
        }
        let content = self
            .store
            .document(id)
            .map(|d| d.content.clone())
            .unwrap_or_default();
        self.engine.load(&content);
        true
    }

    pub fn set_range(&mut self, range: Range) {
        self.engine.set_range(range);
    }

    /// Run one engine command; on success the serialized tree is committed
    /// to the focused document's store history.
    pub fn execute_command(&mut self, command: &str, value: Option<Value>) -> bool {
        let succeeded = self.engine.execute_command(command, value);
        if succeeded {
            if let Some(id) = self.store.current_id().map(str::to_string) {
                let content = self.engine.content();
                self.store.update_document_content(&id, &content);
            }
        }
        succeeded
    }

    /// Document-level undo: steps the focused document's content history
    /// back one entry and reloads the engine from the restored content.
    pub fn undo(&mut self) -> bool {
        let Some(id) = self.store.current_id().map(str::to_string) else {
            return false;
        };
        if !self.store.undo_document(&id) {
            return false;
        }
        self.reload_engine(&id);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(id) = self.store.current_id().map(str::to_string) else {
            return false;
        };
        if !self.store.redo_document(&id) {
            return false;
        }
        self.reload_engine(&id);
        true
    }

    pub fn content(&self) -> String {
        self.engine.content()
    }

    fn reload_engine(&mut self, id: &str) {
        let content = self
            .store
            .document(id)
            .map(|d| d.content.clone())
            .unwrap_or_default();
        self.engine.load(&content);
    }
}
