use vellum_docstore::{CreateOptions, DocumentStore, MemoryStorage, Metadata};

fn store() -> DocumentStore<MemoryStorage> {
    DocumentStore::load(MemoryStorage::new())
}

#[test]
fn update_pushes_previous_and_new_content() {
    let mut store = store();
    let id = store.create_document(CreateOptions::default());

    let created = store.document(&id).expect("created document");
    assert!(created.history.is_empty());
    assert_eq!(created.history_index, -1);
    assert_eq!(created.content, "");

    assert!(store.update_document_content(&id, "<p>one</p>"));

    let doc = store.document(&id).expect("document");
    assert_eq!(doc.history, vec!["".to_string(), "<p>one</p>".to_string()]);
    assert_eq!(doc.history_index, 1);
    assert_eq!(doc.content, "<p>one</p>");
    // The entry right below the index is the pre-call content.
    assert_eq!(doc.history[doc.history_index as usize - 1], "");
}

#[test]
fn metadata_recomputes_on_every_update() {
    let mut store = store();
    let id = store.create_document(CreateOptions::default());

    store.update_document_content(&id, "<p>Hello world out there</p>");
    let doc = store.document(&id).expect("document");
    assert_eq!(doc.metadata.word_count, 4);
    assert_eq!(doc.metadata.character_count, 21);
    assert_eq!(doc.metadata.reading_time_minutes, 1);

    let long = format!("<p>{}</p>", vec!["word"; 250].join(" "));
    store.update_document_content(&id, &long);
    let doc = store.document(&id).expect("document");
    assert_eq!(doc.metadata.word_count, 250);
    assert_eq!(doc.metadata.reading_time_minutes, 2);
}

#[test]
fn empty_content_still_reads_one_minute() {
    assert_eq!(Metadata::from_content("").reading_time_minutes, 1);
    assert_eq!(Metadata::from_content("").word_count, 0);
}

#[test]
fn undo_redo_walk_the_content_history() {
    let mut store = store();
    let id = store.create_document(CreateOptions::default());
    store.update_document_content(&id, "<p>a</p>");
    store.update_document_content(&id, "<p>ab</p>");
    store.update_document_content(&id, "<p>abc</p>");

    assert!(store.undo_document(&id));
    assert_eq!(store.document(&id).unwrap().content, "<p>ab</p>");

    assert!(store.undo_document(&id));
    assert_eq!(store.document(&id).unwrap().content, "<p>a</p>");

    assert!(store.redo_document(&id));
    assert_eq!(store.document(&id).unwrap().content, "<p>ab</p>");

    assert!(store.redo_document(&id));
    assert_eq!(store.document(&id).unwrap().content, "<p>abc</p>");
    assert!(!store.redo_document(&id));
}

#[test]
fn n_undos_return_to_the_seed_content() {
    let mut store = store();
    let id = store.create_document(CreateOptions {
        content: Some("<p>seed</p>".to_string()),
        ..Default::default()
    });

    for n in 1..=5 {
        store.update_document_content(&id, &format!("<p>rev {n}</p>"));
    }
    for _ in 1..=5 {
        assert!(store.undo_document(&id));
    }
    assert_eq!(store.document(&id).unwrap().content, "<p>seed</p>");
    assert!(!store.undo_document(&id));
}

#[test]
fn update_after_undo_truncates_the_redo_tail() {
    let mut store = store();
    let id = store.create_document(CreateOptions::default());
    store.update_document_content(&id, "<p>a</p>");
    store.update_document_content(&id, "<p>b</p>");
    store.undo_document(&id);

    store.update_document_content(&id, "<p>c</p>");

    let doc = store.document(&id).expect("document");
    assert_eq!(
        doc.history,
        vec!["".to_string(), "<p>a</p>".to_string(), "<p>c</p>".to_string()]
    );
    assert_eq!(doc.history_index, 2);
    assert!(!store.redo_document(&id));
}

#[test]
fn history_index_always_points_at_the_content() {
    let mut store = store();
    let id = store.create_document(CreateOptions::default());

    store.update_document_content(&id, "<p>x</p>");
    store.update_document_content(&id, "<p>x</p>"); // no-op update
    let doc = store.document(&id).expect("document");
    assert_eq!(doc.history.len(), 2);
    assert_eq!(doc.history[doc.history_index as usize], doc.content);

    store.undo_document(&id);
    let doc = store.document(&id).expect("document");
    assert_eq!(doc.history[doc.history_index as usize], doc.content);
}

#[test]
fn history_ops_on_unknown_ids_return_false() {
    let mut store = store();
    assert!(!store.update_document_content("doc-99", "<p>x</p>"));
    assert!(!store.undo_document("doc-99"));
    assert!(!store.redo_document("doc-99"));
}
