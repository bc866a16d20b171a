use gridbase::core::cell::{CellValue, FieldOptions, FieldType};
use gridbase::core::config::{self, OrphanPolicy};
use gridbase::core::error::GridError;
use gridbase::core::ordering;
use gridbase::core::store::{Session, Store};
use gridbase::initialize_store;
use gridbase::plugins::base::{self, BasePatch};
use gridbase::plugins::field::{self, NewField};
use gridbase::plugins::record;
use gridbase::plugins::table;
use gridbase::plugins::workspace::{self, Workspace};
use std::fs;
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("store");
    let store = initialize_store(&root).unwrap();
    (tmp, store)
}

fn store_with_config(toml: &str) -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("store");
    fs::create_dir_all(&root).unwrap();
    fs::write(config::config_path(&root), toml).unwrap();
    let store = initialize_store(&root).unwrap();
    (tmp, store)
}

fn signed_up(store: &Store, user: &str) -> (Session, Workspace) {
    let session = Session::sign_in(user, None).unwrap();
    let ws = workspace::sign_up(store, &session).unwrap();
    (session, ws)
}

fn field_indices(store: &Store, session: &Session, table_id: &str) -> Vec<i64> {
    field::list_fields(store, session, table_id)
        .unwrap()
        .iter()
        .map(|f| f.order_index)
        .collect()
}

#[test]
fn test_sign_up_creates_default_workspace_once() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    assert_eq!(ws.name, "ada's Workspace");
    assert_eq!(ws.owner, "ada");

    let again = workspace::sign_up(&store, &session).unwrap();
    assert_eq!(again.id, ws.id);
    assert_eq!(workspace::list_workspaces(&store, &session).unwrap().len(), 1);
}

#[test]
fn test_signed_out_session_is_rejected() {
    let (_tmp, store) = test_store();
    let (mut session, ws) = signed_up(&store, "ada");
    session.sign_out();
    let err = base::create_base(&store, &session, &ws.id, "Sales", BasePatch::default()).unwrap_err();
    assert!(matches!(err, GridError::Unauthenticated(_)));
}

#[test]
fn test_base_defaults_and_update() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "  Sales ", BasePatch::default()).unwrap();
    assert_eq!(b.name, "Sales");
    assert_eq!(b.icon, base::DEFAULT_ICON);
    assert_eq!(b.color, base::DEFAULT_COLOR);
    assert_eq!(b.description, "");

    let patch = BasePatch {
        color: Some("red".to_string()),
        ..Default::default()
    };
    let updated = base::update_base(&store, &session, &b.id, patch).unwrap();
    assert_eq!(updated.color, "red");
    assert_eq!(updated.name, "Sales");
    assert_eq!(base::get_base(&store, &session, &b.id).unwrap(), updated);
}

#[test]
fn test_empty_names_are_rejected() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let err = base::create_base(&store, &session, &ws.id, "   ", BasePatch::default()).unwrap_err();
    assert!(matches!(err, GridError::ValidationError(_)));
    assert!(base::list_bases(&store, &session, &ws.id).unwrap().is_empty());
}

#[test]
fn test_other_users_cannot_see_workspace_contents() {
    let (_tmp, store) = test_store();
    let (ada, ws) = signed_up(&store, "ada");
    let (bob, _) = signed_up(&store, "bob");
    let b = base::create_base(&store, &ada, &ws.id, "Sales", BasePatch::default()).unwrap();

    assert!(matches!(
        base::list_bases(&store, &bob, &ws.id),
        Err(GridError::NotFound(_))
    ));
    assert!(matches!(
        base::get_base(&store, &bob, &b.id),
        Err(GridError::NotFound(_))
    ));
    assert!(matches!(
        table::create_table(&store, &bob, &b.id, "Leads"),
        Err(GridError::NotFound(_))
    ));
}

#[test]
fn test_sales_leads_scenario() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Sales", BasePatch::default()).unwrap();
    let (t, primary) = table::create_table(&store, &session, &b.id, "Leads").unwrap();

    assert_eq!(primary.name, table::PRIMARY_FIELD_NAME);
    assert_eq!(primary.field_type, FieldType::Text);
    assert!(primary.required);
    assert_eq!(primary.order_index, 0);

    let r = record::create_record(&store, &session, &t.id).unwrap();
    assert_eq!(r.data.len(), 1);
    assert_eq!(r.data[&primary.id], CellValue::Text(String::new()));
}

#[test]
fn test_record_defaults_by_field_type() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, primary) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let f2 = field::create_field(&store, &session, &t.id, NewField::new("Qty", FieldType::Number)).unwrap();
    let f3 = field::create_field(&store, &session, &t.id, NewField::new("Done", FieldType::Checkbox)).unwrap();

    let r = record::create_record(&store, &session, &t.id).unwrap();
    assert_eq!(r.data[&primary.id], CellValue::Text(String::new()));
    assert_eq!(r.data[&f2.id], CellValue::Number(0.0));
    assert_eq!(r.data[&f3.id], CellValue::Checkbox(false));
}

#[test]
fn test_field_indices_stay_dense() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();

    let mut ids = Vec::new();
    for name in ["A", "B", "C", "D"] {
        ids.push(field::create_field(&store, &session, &t.id, NewField::new(name, FieldType::Text)).unwrap().id);
    }
    assert_eq!(field_indices(&store, &session, &t.id), vec![0, 1, 2, 3, 4]);

    field::delete_field(&store, &session, &ids[1]).unwrap();
    let indices = field_indices(&store, &session, &t.id);
    assert!(ordering::is_dense(&indices));
    assert_eq!(indices.len(), 4);

    let moved = field::move_field(&store, &session, &ids[3], 0).unwrap();
    assert_eq!(moved.order_index, 0);
    let fields = field::list_fields(&store, &session, &t.id).unwrap();
    assert_eq!(fields[0].id, ids[3]);
    assert!(ordering::is_dense(&fields.iter().map(|f| f.order_index).collect::<Vec<_>>()));

    // Past-the-end targets clamp to the last slot.
    let moved = field::move_field(&store, &session, &ids[0], 99).unwrap();
    assert_eq!(moved.order_index, 3);
}

#[test]
fn test_table_order_after_delete_and_move() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let t1 = table::create_table(&store, &session, &b.id, "One").unwrap().0;
    let t2 = table::create_table(&store, &session, &b.id, "Two").unwrap().0;
    let t3 = table::create_table(&store, &session, &b.id, "Three").unwrap().0;
    assert_eq!((t1.order_index, t2.order_index, t3.order_index), (0, 1, 2));

    table::delete_table(&store, &session, &t1.id).unwrap();
    let names: Vec<(String, i64)> = table::list_tables(&store, &session, &b.id)
        .unwrap()
        .into_iter()
        .map(|t| (t.name, t.order_index))
        .collect();
    assert_eq!(names, vec![("Two".to_string(), 0), ("Three".to_string(), 1)]);

    table::move_table(&store, &session, &t3.id, 0).unwrap();
    let first = &table::list_tables(&store, &session, &b.id).unwrap()[0];
    assert_eq!(first.id, t3.id);
}

#[test]
fn test_delete_table_cascades() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, primary) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let r = record::create_record(&store, &session, &t.id).unwrap();

    table::delete_table(&store, &session, &t.id).unwrap();
    assert!(matches!(field::get_field(&store, &session, &primary.id), Err(GridError::NotFound(_))));
    assert!(matches!(record::get_record(&store, &session, &r.id), Err(GridError::NotFound(_))));
}

#[test]
fn test_edit_cell_coerces_by_type() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, primary) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let qty = field::create_field(&store, &session, &t.id, NewField::new("Qty", FieldType::Number)).unwrap();
    let done = field::create_field(&store, &session, &t.id, NewField::new("Done", FieldType::Checkbox)).unwrap();
    let r = record::create_record(&store, &session, &t.id).unwrap();

    let r2 = record::edit_cell(&store, &session, &r.id, &qty.id, "abc").unwrap();
    assert_eq!(r2.data[&qty.id], CellValue::Number(0.0));
    let r2 = record::edit_cell(&store, &session, &r.id, &qty.id, "12.5kg").unwrap();
    assert_eq!(r2.data[&qty.id], CellValue::Number(12.5));

    let r2 = record::edit_cell(&store, &session, &r.id, &done.id, "true").unwrap();
    assert_eq!(r2.data[&done.id], CellValue::Checkbox(true));
    let r2 = record::edit_cell(&store, &session, &r.id, &done.id, "false").unwrap();
    assert_eq!(r2.data[&done.id], CellValue::Checkbox(false));
    let r2 = record::edit_cell(&store, &session, &r.id, &done.id, "yes").unwrap();
    assert_eq!(r2.data[&done.id], CellValue::Checkbox(false));

    let r2 = record::edit_cell(&store, &session, &r.id, &primary.id, "Widget").unwrap();
    assert_eq!(r2.data[&primary.id], CellValue::Text("Widget".to_string()));

    // Edits replace the whole map but keep every other key.
    let stored = record::get_record(&store, &session, &r.id).unwrap();
    assert_eq!(stored.data.len(), 3);
    assert_eq!(stored.data[&qty.id], CellValue::Number(12.5));
}

#[test]
fn test_invalid_edit_leaves_record_unchanged() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let email = field::create_field(&store, &session, &t.id, NewField::new("Email", FieldType::Email)).unwrap();
    let stage = field::create_field(
        &store,
        &session,
        &t.id,
        NewField::new("Stage", FieldType::Select).with_options(FieldOptions::with_choices(["Lead", "Won"])),
    )
    .unwrap();
    let r = record::create_record(&store, &session, &t.id).unwrap();

    assert!(matches!(
        record::edit_cell(&store, &session, &r.id, &email.id, "not-an-email"),
        Err(GridError::ValidationError(_))
    ));
    assert!(matches!(
        record::edit_cell(&store, &session, &r.id, &stage.id, "Lost"),
        Err(GridError::ValidationError(_))
    ));
    let ok = record::edit_cell(&store, &session, &r.id, &stage.id, "Won").unwrap();
    assert_eq!(ok.data[&stage.id], CellValue::Select("Won".to_string()));
    assert_eq!(
        record::get_record(&store, &session, &r.id).unwrap().data[&email.id],
        CellValue::Email(String::new())
    );
}

#[test]
fn test_set_cell_rejects_mismatched_variant() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, primary) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let r = record::create_record(&store, &session, &t.id).unwrap();

    assert!(matches!(
        record::set_cell(&store, &session, &r.id, &primary.id, CellValue::Number(1.0)),
        Err(GridError::ValidationError(_))
    ));
    let ok = record::set_cell(&store, &session, &r.id, &primary.id, CellValue::Text("x".into())).unwrap();
    assert_eq!(ok.data[&primary.id], CellValue::Text("x".into()));
}

#[test]
fn test_field_added_later_reads_as_empty() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let r = record::create_record(&store, &session, &t.id).unwrap();
    let late = field::create_field(&store, &session, &t.id, NewField::new("Late", FieldType::Number)).unwrap();

    let stored = record::get_record(&store, &session, &r.id).unwrap();
    assert!(!stored.data.contains_key(&late.id));
    assert_eq!(stored.cell(&late), CellValue::Number(0.0));
}

#[test]
fn test_deleted_field_key_is_retained_by_default() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let note = field::create_field(&store, &session, &t.id, NewField::new("Note", FieldType::Text)).unwrap();
    let r = record::create_record(&store, &session, &t.id).unwrap();
    record::edit_cell(&store, &session, &r.id, &note.id, "keep me").unwrap();

    let deletion = field::delete_field(&store, &session, &note.id).unwrap();
    assert_eq!(deletion.policy, OrphanPolicy::Retain);
    assert_eq!(deletion.pruned_records, 0);

    let stored = record::get_record(&store, &session, &r.id).unwrap();
    assert_eq!(stored.data[&note.id], CellValue::Text("keep me".to_string()));
    let fields = field::list_fields(&store, &session, &t.id).unwrap();
    assert_eq!(stored.orphaned_keys(&fields), vec![note.id.clone()]);
    assert_eq!(stored.visible_cells(&fields).len(), 1);
}

#[test]
fn test_deleted_field_key_is_pruned_when_configured() {
    let (_tmp, store) = store_with_config("[grid]\norphaned_keys = \"prune\"\n");
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let note = field::create_field(&store, &session, &t.id, NewField::new("Note", FieldType::Text)).unwrap();
    let r1 = record::create_record(&store, &session, &t.id).unwrap();
    let r2 = record::create_record(&store, &session, &t.id).unwrap();

    let deletion = field::delete_field(&store, &session, &note.id).unwrap();
    assert_eq!(deletion.policy, OrphanPolicy::Prune);
    assert_eq!(deletion.pruned_records, 2);
    for id in [&r1.id, &r2.id] {
        let stored = record::get_record(&store, &session, id).unwrap();
        assert!(!stored.data.contains_key(&note.id));
    }
}

#[test]
fn test_select_options_normalized_and_updatable() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, primary) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let tags = field::create_field(
        &store,
        &session,
        &t.id,
        NewField::new("Tags", FieldType::MultiSelect)
            .with_options(FieldOptions::with_choices([" a ", "b", "a", ""])),
    )
    .unwrap();
    assert_eq!(tags.options.choices, vec!["a", "b"]);

    let updated = field::update_field_options(&store, &session, &tags.id, FieldOptions::with_choices(["c"])).unwrap();
    assert_eq!(updated.options.choices, vec!["c"]);
    assert!(matches!(
        field::update_field_options(&store, &session, &primary.id, FieldOptions::with_choices(["x"])),
        Err(GridError::ValidationError(_))
    ));

    let r = record::create_record(&store, &session, &t.id).unwrap();
    let edited = record::edit_cell(&store, &session, &r.id, &tags.id, "c").unwrap();
    assert_eq!(
        edited.data[&tags.id],
        CellValue::MultiSelect(["c".to_string()].into_iter().collect())
    );
}

#[test]
fn test_records_listed_in_creation_order() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();
    let ids: Vec<String> = (0..5)
        .map(|_| record::create_record(&store, &session, &t.id).unwrap().id)
        .collect();
    let listed: Vec<String> = record::list_records(&store, &session, &t.id)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(listed, ids);

    record::delete_record(&store, &session, &ids[2]).unwrap();
    assert_eq!(record::list_records(&store, &session, &t.id).unwrap().len(), 4);
}

#[test]
fn test_delete_workspace_cascades() {
    let (_tmp, store) = test_store();
    let (session, ws) = signed_up(&store, "ada");
    let b = base::create_base(&store, &session, &ws.id, "Ops", BasePatch::default()).unwrap();
    let (t, _) = table::create_table(&store, &session, &b.id, "Items").unwrap();

    workspace::delete_workspace(&store, &session, &ws.id).unwrap();
    assert!(matches!(base::get_base(&store, &session, &b.id), Err(GridError::NotFound(_))));
    assert!(matches!(table::get_table(&store, &session, &t.id), Err(GridError::NotFound(_))));
}
