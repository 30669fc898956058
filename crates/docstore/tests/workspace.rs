use std::cell::RefCell;
use std::rc::Rc;

use vellum_docstore::{CreateOptions, Workspace};
use vellum_engine_core::{EngineEvent, Point, Range};

fn workspace_with_document() -> (Workspace<vellum_docstore::MemoryStorage>, String) {
    let mut workspace = Workspace::in_memory();
    let id = workspace.create_document(CreateOptions::default());
    (workspace, id)
}

fn select(workspace: &mut Workspace<vellum_docstore::MemoryStorage>, start: usize, end: usize) {
    workspace.set_range(Range::new(
        Point::new(vec![0, 0], start),
        Point::new(vec![0, 0], end),
    ));
}

#[test]
fn successful_commands_commit_to_the_store_history() {
    let (mut workspace, id) = workspace_with_document();

    assert!(workspace.execute_command("insertText", Some("Hello".into())));
    assert_eq!(workspace.content(), "<p>Hello</p>");

    let doc = workspace.store().document(&id).expect("document");
    assert_eq!(doc.content, "<p>Hello</p>");
    assert_eq!(doc.history_index, 1);
    assert_eq!(doc.metadata.word_count, 1);

    select(&mut workspace, 0, 5);
    assert!(workspace.execute_command("bold", None));
    let doc = workspace.store().document(&id).expect("document");
    assert_eq!(doc.content, "<p><strong>Hello</strong></p>");
    assert_eq!(doc.history.len(), 3);
}

#[test]
fn collapsed_selection_bold_fails_and_commits_nothing() {
    let (mut workspace, id) = workspace_with_document();
    workspace.execute_command("insertText", Some("Hello".into()));
    let before = workspace.store().document(&id).unwrap().history.len();

    let errors: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&errors);
    workspace
        .engine_mut()
        .events_mut()
        .subscribe(move |event| {
            if let EngineEvent::CommandError { command, .. } = event {
                sink.borrow_mut().push(command.clone());
            }
        });

    select(&mut workspace, 2, 2);
    assert!(!workspace.execute_command("bold", None));

    assert_eq!(workspace.content(), "<p>Hello</p>");
    let doc = workspace.store().document(&id).expect("document");
    assert_eq!(doc.content, "<p>Hello</p>");
    assert_eq!(doc.history.len(), before);
    assert_eq!(errors.borrow().as_slice(), ["bold".to_string()]);
}

#[test]
fn undo_and_redo_reload_the_engine_from_store_history() {
    let (mut workspace, id) = workspace_with_document();
    workspace.execute_command("insertText", Some("draft".into()));
    select(&mut workspace, 0, 5);
    workspace.execute_command("italic", None);
    assert_eq!(workspace.content(), "<p><em>draft</em></p>");

    assert!(workspace.undo());
    assert_eq!(workspace.content(), "<p>draft</p>");
    assert_eq!(
        workspace.store().document(&id).unwrap().content,
        "<p>draft</p>"
    );

    assert!(workspace.redo());
    assert_eq!(workspace.content(), "<p><em>draft</em></p>");

    // Boundary.
    assert!(!workspace.redo());
}

#[test]
fn undo_with_no_documents_is_false() {
    let mut workspace = Workspace::in_memory();
    assert!(!workspace.undo());
    assert!(!workspace.redo());
    assert!(!workspace.execute_command("bold", None));
}

#[test]
fn switching_documents_flushes_the_outgoing_one() {
    let (mut workspace, first) = workspace_with_document();
    workspace.execute_command("insertText", Some("first doc".into()));

    let second = workspace.create_document(CreateOptions {
        name: Some("Second".to_string()),
        ..Default::default()
    });
    assert_eq!(workspace.store().current_id(), Some(first.as_str()));

    assert!(workspace.open_document(&second));
    assert_eq!(workspace.store().current_id(), Some(second.as_str()));
    assert_eq!(workspace.content(), "<p></p>");

    workspace.execute_command("insertText", Some("second doc".into()));

    assert!(workspace.open_document(&first));
    assert_eq!(workspace.content(), "<p>first doc</p>");
    assert_eq!(
        workspace.store().document(&second).unwrap().content,
        "<p>second doc</p>"
    );

    assert!(!workspace.open_document("doc-99"));
}

#[test]
fn store_undo_survives_a_document_switch() {
    let (mut workspace, first) = workspace_with_document();
    workspace.execute_command("insertText", Some("v1".into()));
    workspace.execute_command("insertText", Some(" v2".into()));

    let second = workspace.create_document(CreateOptions::default());
    workspace.open_document(&second);
    workspace.open_document(&first);

    // Engine history reset on switch; the store history still undoes.
    assert!(!workspace.engine().can_undo());
    assert!(workspace.undo());
    assert_eq!(workspace.content(), "<p>v1</p>");
}

#[test]
fn creating_the_first_document_focuses_it() {
    let mut workspace = Workspace::in_memory();
    let id = workspace.create_document(CreateOptions {
        content: Some("<p>ready</p>".to_string()),
        ..Default::default()
    });

    assert_eq!(workspace.store().current_id(), Some(id.as_str()));
    assert_eq!(workspace.content(), "<p>ready</p>");
    assert!(workspace.engine().range().is_some());
}
