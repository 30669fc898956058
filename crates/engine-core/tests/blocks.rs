use vellum_engine_core::{CommandEngine, Node, Point, Range};

fn engine_with(content: &str) -> CommandEngine {
    let mut engine = CommandEngine::new();
    engine.load(content);
    engine
}

fn caret(engine: &mut CommandEngine, path: &[usize], offset: usize) {
    engine.set_range(Range::collapsed(Point::new(path.to_vec(), offset)));
}

#[test]
fn justify_center_sets_align_on_the_nearest_block() {
    let mut engine = engine_with("<p>Hello</p><p>other</p>");
    caret(&mut engine, &[0, 0], 2);

    assert!(engine.execute_command("justifyCenter", None));
    assert_eq!(engine.content(), "<p align=\"center\">Hello</p><p>other</p>");
    assert_eq!(engine.active_align().as_deref(), Some("center"));
}

#[test]
fn justify_left_removes_the_align_attr() {
    let mut engine = engine_with("<p align=\"right\">Hello</p>");
    caret(&mut engine, &[0, 0], 0);

    assert!(engine.execute_command("justifyLeft", None));
    assert_eq!(engine.content(), "<p>Hello</p>");
    assert_eq!(engine.active_align(), None);
}

#[test]
fn justify_full_stores_the_justify_value() {
    let mut engine = engine_with("<p>Hello</p>");
    caret(&mut engine, &[0, 0], 0);

    assert!(engine.execute_command("justifyFull", None));
    assert_eq!(engine.content(), "<p align=\"justify\">Hello</p>");
}

#[test]
fn format_block_turns_paragraph_into_heading() {
    let mut engine = engine_with("<p>Title</p><p>body</p>");
    caret(&mut engine, &[0, 0], 3);

    assert!(engine.execute_command("formatBlock", Some("h2".into())));
    assert_eq!(engine.content(), "<h2>Title</h2><p>body</p>");
    assert_eq!(engine.active_block_kind().as_deref(), Some("heading"));
}

#[test]
fn format_block_accepts_angle_bracketed_uppercase_tags() {
    let mut engine = engine_with("<p>quote me</p>");
    caret(&mut engine, &[0, 0], 0);

    assert!(engine.execute_command("formatBlock", Some("<BLOCKQUOTE>".into())));
    assert_eq!(engine.content(), "<blockquote>quote me</blockquote>");
}

#[test]
fn format_block_back_to_paragraph_drops_the_level_attr() {
    let mut engine = engine_with("<h3>Title</h3>");
    caret(&mut engine, &[0, 0], 0);

    assert!(engine.execute_command("formatBlock", Some("p".into())));
    assert_eq!(engine.content(), "<p>Title</p>");
}

#[test]
fn format_block_rejects_unknown_tags() {
    let mut engine = engine_with("<p>Hello</p>");
    caret(&mut engine, &[0, 0], 0);

    assert!(!engine.execute_command("formatBlock", Some("table".into())));
    assert_eq!(engine.content(), "<p>Hello</p>");
}

#[test]
fn format_block_preserves_inline_formatting() {
    let mut engine = engine_with("<p><strong>bold</strong> tail</p>");
    caret(&mut engine, &[0, 1], 1);

    assert!(engine.execute_command("formatBlock", Some("h1".into())));
    assert_eq!(engine.content(), "<h1><strong>bold</strong> tail</h1>");
}

#[test]
fn indent_and_outdent_adjust_within_bounds() {
    let mut engine = engine_with("<p>Hello</p>");
    caret(&mut engine, &[0, 0], 0);

    assert!(engine.execute_command("indent", None));
    assert_eq!(engine.content(), "<p indent=\"1\">Hello</p>");

    assert!(engine.execute_command("indent", None));
    assert_eq!(engine.content(), "<p indent=\"2\">Hello</p>");

    assert!(engine.execute_command("outdent", None));
    assert!(engine.execute_command("outdent", None));
    assert_eq!(engine.content(), "<p>Hello</p>");

    // Outdent at zero stays at zero.
    assert!(engine.execute_command("outdent", None));
    assert_eq!(engine.content(), "<p>Hello</p>");
}

#[test]
fn insert_horizontal_rule_adds_divider_and_fresh_paragraph() {
    let mut engine = engine_with("<p>above</p><p>below</p>");
    caret(&mut engine, &[0, 0], 5);

    assert!(engine.execute_command("insertHorizontalRule", None));
    assert_eq!(engine.content(), "<p>above</p><hr><p></p><p>below</p>");

    // Caret lands in the fresh paragraph.
    let range = engine.range().expect("range after insert");
    assert!(range.is_collapsed());
    assert_eq!(range.start.path, vec![2, 0]);
}

#[test]
fn unordered_list_wraps_and_unwraps_the_current_block() {
    let mut engine = engine_with("<p>alpha</p><p>beta</p>");
    caret(&mut engine, &[0, 0], 1);

    assert!(engine.execute_command("insertUnorderedList", None));
    assert_eq!(engine.content(), "<ul><li>alpha</li></ul><p>beta</p>");
    let Node::Element(list) = &engine.doc().children[0] else {
        panic!("expected list");
    };
    assert_eq!(list.kind, "list");

    assert!(engine.execute_command("insertUnorderedList", None));
    assert_eq!(engine.content(), "<p>alpha</p><p>beta</p>");
}

#[test]
fn ordered_list_on_a_bulleted_list_switches_the_type() {
    let mut engine = engine_with("<ul><li>one</li><li>two</li></ul>");
    caret(&mut engine, &[0, 0, 0], 0);

    assert!(engine.execute_command("insertOrderedList", None));
    assert_eq!(engine.content(), "<ol><li>one</li><li>two</li></ol>");

    assert!(engine.execute_command("insertOrderedList", None));
    assert_eq!(engine.content(), "<p>one</p><p>two</p>");
}

#[test]
fn dissolving_a_list_keeps_item_order_and_formatting() {
    let mut engine = engine_with("<ul><li><strong>a</strong></li><li>b</li></ul><p>tail</p>");
    caret(&mut engine, &[0, 0, 0, 0], 0);

    assert!(engine.execute_command("insertUnorderedList", None));
    assert_eq!(
        engine.content(),
        "<p><strong>a</strong></p><p>b</p><p>tail</p>"
    );
}
