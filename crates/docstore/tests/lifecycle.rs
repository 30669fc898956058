use std::cell::RefCell;
use std::rc::Rc;

use vellum_docstore::{
    CreateOptions, DocumentStore, MemoryStorage, Storage, StoreEvent,
};

fn store() -> DocumentStore<MemoryStorage> {
    DocumentStore::load(MemoryStorage::new())
}

fn named(name: &str, content: &str) -> CreateOptions {
    CreateOptions {
        name: Some(name.to_string()),
        content: Some(content.to_string()),
    }
}

#[test]
fn ids_are_sequential_and_the_first_document_becomes_current() {
    let mut store = store();
    let a = store.create_document(CreateOptions::default());
    let b = store.create_document(CreateOptions::default());

    assert_eq!(a, "doc-1");
    assert_eq!(b, "doc-2");
    assert_eq!(store.current_id(), Some("doc-1"));
    assert_eq!(store.len(), 2);
}

#[test]
fn rename_changes_the_name_and_nothing_else() {
    let mut store = store();
    let id = store.create_document(named("Draft", "<p>text</p>"));

    assert!(store.rename_document(&id, "Final"));
    let doc = store.document(&id).expect("document");
    assert_eq!(doc.name, "Final");
    assert_eq!(doc.content, "<p>text</p>");

    assert!(!store.rename_document("doc-99", "nope"));
}

#[test]
fn delete_removes_the_document_and_its_persisted_state() {
    let mut store = store();
    let a = store.create_document(named("A", ""));
    let b = store.create_document(named("B", ""));

    assert!(store.delete_document(&a));
    assert!(store.document(&a).is_none());
    assert!(store.storage().get(&format!("vellum.doc.{a}")).is_none());
    assert_eq!(store.current_id(), Some(b.as_str()));

    assert!(!store.delete_document(&a));
}

#[test]
fn duplicate_is_a_deep_independent_copy() {
    let mut store = store();
    let original = store.create_document(named("Notes", "<p>shared</p>"));
    store.update_document_content(&original, "<p>edited once</p>");

    let copy = store.duplicate_document(&original).expect("copy id");
    assert_ne!(copy, original);

    let copied = store.document(&copy).expect("copy");
    assert_eq!(copied.name, "Copy of Notes");
    assert_eq!(copied.content, "<p>edited once</p>");
    assert_eq!(copied.history, store.document(&original).unwrap().history);

    // Mutating the original leaves the copy untouched.
    store.update_document_content(&original, "<p>diverged</p>");
    let copied = store.document(&copy).expect("copy");
    assert_eq!(copied.content, "<p>edited once</p>");
    assert!(store.undo_document(&copy));
    assert_eq!(
        store.document(&copy).unwrap().content,
        "<p>shared</p>"
    );
}

#[test]
fn search_matches_names_and_plain_text_case_insensitively() {
    let mut store = store();
    store.create_document(named("Meeting Notes", "<p>Agenda for Monday</p>"));
    store.create_document(named("Recipes", "<p>Pasta with <strong>GARLIC</strong></p>"));

    let by_name = store.search_documents("meeting");
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].name, "Meeting Notes");

    let by_content = store.search_documents("garlic");
    assert_eq!(by_content.len(), 1);
    assert_eq!(by_content[0].name, "Recipes");
    assert_eq!(
        by_content[0].content,
        "<p>Pasta with <strong>GARLIC</strong></p>"
    );
    assert_eq!(by_content[0].metadata.word_count, 3);

    assert!(store.search_documents("nowhere").is_empty());
    assert_eq!(store.search_documents("").len(), 2);
}

#[test]
fn document_list_carries_summaries_with_previews() {
    let mut store = store();
    let long_body = format!("<p>{}</p>", "a".repeat(200));
    store.create_document(named("Long", &long_body));
    store.create_document(named("Short", "<p>hi there</p>"));

    let list = store.document_list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].name, "Long");
    assert_eq!(list[0].preview.chars().count(), 80);
    assert_eq!(list[1].word_count, 2);
    assert_eq!(list[1].preview, "hi there");
}

#[test]
fn a_reloaded_store_sees_persisted_documents() {
    let mut store = store();
    let id = store.create_document(named("Kept", "<p>payload</p>"));
    store.update_document_content(&id, "<p>revised</p>");

    let storage = store.into_storage();
    let reloaded = DocumentStore::load(storage);

    assert_eq!(reloaded.len(), 1);
    let doc = reloaded.document(&id).expect("persisted document");
    assert_eq!(doc.name, "Kept");
    assert_eq!(doc.content, "<p>revised</p>");
    assert_eq!(doc.history_index, 1);
    assert_eq!(reloaded.current_id(), Some(id.as_str()));

    // Ids keep counting up after a reload.
    let mut reloaded = reloaded;
    let next = reloaded.create_document(CreateOptions::default());
    assert_eq!(next, "doc-2");
}

#[test]
fn storage_failures_emit_an_event_and_keep_memory_state() {
    let events: Rc<RefCell<Vec<StoreEvent>>> = Rc::default();
    let sink = Rc::clone(&events);

    let mut store = DocumentStore::load(MemoryStorage::with_byte_budget(16));
    store
        .events_mut()
        .subscribe(move |event| sink.borrow_mut().push(event.clone()));

    let id = store.create_document(named("Too big", "<p>well past the byte budget</p>"));

    assert!(store.document(&id).is_some());
    assert!(
        events
            .borrow()
            .iter()
            .any(|e| matches!(e, StoreEvent::StorageError { .. }))
    );
}

#[test]
fn overwriting_a_key_reuses_its_byte_budget() {
    let mut storage = MemoryStorage::with_byte_budget(16);
    storage.set("k", "0123456789").expect("within budget");
    // The old entry's key and value are both freed by the overwrite.
    storage
        .set("k", "0123456789abcde")
        .expect("exactly at budget");
    assert!(storage.set("k", "0123456789abcdef").is_err());
    assert_eq!(storage.get("k").as_deref(), Some("0123456789abcde"));
    assert_eq!(storage.len(), 1);
}

#[test]
fn set_current_document_moves_the_pointer() {
    let events: Rc<RefCell<Vec<StoreEvent>>> = Rc::default();
    let sink = Rc::clone(&events);

    let mut store = store();
    let a = store.create_document(named("A", ""));
    let b = store.create_document(named("B", ""));
    store
        .events_mut()
        .subscribe(move |event| sink.borrow_mut().push(event.clone()));

    assert_eq!(store.current_id(), Some(a.as_str()));
    assert!(store.set_current_document(&b));
    assert_eq!(store.current_id(), Some(b.as_str()));
    assert!(!store.set_current_document("doc-99"));

    assert!(events.borrow().iter().any(|e| matches!(
        e,
        StoreEvent::CurrentDocumentChanged { id: Some(id) } if id == &b
    )));
}
