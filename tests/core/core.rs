use gridbase::core::broker::{self, BrokerEvent, DbBroker};
use gridbase::core::cell::{self, CellValue, FieldOptions, FieldType};
use gridbase::core::config::{self, OrphanPolicy};
use gridbase::core::db;
use gridbase::core::error::GridError;
use gridbase::core::ordering::{self, OrderScope};
use gridbase::core::schemas;
use gridbase::core::store::{Session, SessionState, Store};
use gridbase::plugins::base::{self, BasePatch};
use gridbase::plugins::workspace;
use gridbase::{initialize_store, require_confirmation, schema_catalog};
use rusqlite::params;
use std::fs;
use std::sync::{Arc, Barrier};
use tempfile::tempdir;

#[test]
fn db_pragmas_and_schema_are_in_place() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    db::initialize_grid_db(&root).expect("grid init");
    // Idempotent.
    db::initialize_grid_db(&root).expect("grid re-init");

    let db_path = db::grid_db_path(&root);
    assert!(db_path.ends_with(schemas::GRID_DB_NAME));
    let conn = db::db_connect(&db_path.to_string_lossy()).expect("db connect");

    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma journal_mode");
    assert_eq!(mode.to_lowercase(), "wal");

    for table in ["workspaces", "bases", "grid_tables", "fields", "records", "subscription_plans"] {
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .expect("sqlite_master");
        assert_eq!(n, 1, "missing table {table}");
    }
}

#[test]
fn broker_audits_every_call_and_rolls_back_failed_transactions() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    db::initialize_grid_db(&root).expect("grid init");
    let store = Store::new(&root);

    db::with_grid_tx(&store, "tester", "test.insert", |conn| {
        conn.execute(
            "INSERT INTO workspaces(id, name, owner, created_at) VALUES('w1', 'One', 'tester', '0Z')",
            [],
        )?;
        Ok(())
    })
    .expect("insert");

    let failed: Result<(), GridError> = db::with_grid_tx(&store, "tester", "test.rollback", |conn| {
        conn.execute(
            "INSERT INTO workspaces(id, name, owner, created_at) VALUES('w2', 'Two', 'tester', '0Z')",
            [],
        )?;
        Err(GridError::validation("abort"))
    });
    assert!(failed.is_err());

    let count: i64 = db::with_grid(&store, "tester", "test.count", |conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM workspaces", [], |row| row.get(0))?)
    })
    .expect("count");
    assert_eq!(count, 1);

    let events: Vec<BrokerEvent> = DbBroker::new(&root).recent_events(3).expect("events");
    let ops: Vec<(&str, &str)> = events.iter().map(|e| (e.op.as_str(), e.status.as_str())).collect();
    assert_eq!(
        ops,
        vec![("test.insert", "success"), ("test.rollback", "error"), ("test.count", "success")]
    );
    assert!(events.iter().all(|e| e.actor == "tester" && e.db_id == schemas::GRID_DB_NAME));
    assert!(root.join(broker::AUDIT_LOG_NAME).exists());
}

#[test]
fn failed_audit_write_rolls_back_the_transaction() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    let store = initialize_store(&root).expect("init");
    let session = Session::sign_in("ada", None).expect("sign in");
    let ws = workspace::sign_up(&store, &session).expect("sign up");

    let log = root.join(broker::AUDIT_LOG_NAME);
    fs::remove_file(&log).expect("remove audit log");
    fs::create_dir(&log).expect("block audit log");
    let created = base::create_base(&store, &session, &ws.id, "Sales", BasePatch::default());
    assert!(matches!(created, Err(GridError::IoError(_))));

    fs::remove_dir(&log).expect("unblock audit log");
    assert!(base::list_bases(&store, &session, &ws.id).expect("list").is_empty());
}

#[test]
fn broker_serializes_concurrent_writers() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    db::initialize_grid_db(&root).expect("grid init");

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let store = Store::new(&root);
                barrier.wait();
                db::with_grid_tx(&store, "tester", "test.concurrent", |conn| {
                    conn.execute(
                        "INSERT INTO workspaces(id, name, owner, created_at) VALUES(?1, 'W', 'tester', '0Z')",
                        params![format!("w{i}")],
                    )?;
                    Ok(())
                })
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join").expect("insert");
    }

    let store = Store::new(&root);
    let count: i64 = db::with_grid(&store, "tester", "test.count", |conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM workspaces", [], |row| row.get(0))?)
    })
    .expect("count");
    assert_eq!(count, threads as i64);
}

#[test]
fn ordering_reindex_closes_gaps() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    db::initialize_grid_db(&root).expect("grid init");
    let store = Store::new(&root);

    let indices = db::with_grid_tx(&store, "tester", "test.order", |conn| {
        conn.execute(
            "INSERT INTO workspaces(id, name, owner, created_at) VALUES('w', 'W', 'tester', '0Z')",
            [],
        )?;
        conn.execute(
            "INSERT INTO bases(id, workspace_id, name, created_by, created_at) VALUES('b', 'w', 'B', 'tester', '0Z')",
            [],
        )?;
        for (id, idx) in [("t1", 0), ("t2", 3), ("t3", 7)] {
            conn.execute(
                "INSERT INTO grid_tables(id, base_id, name, order_index, created_at) VALUES(?1, 'b', ?1, ?2, '0Z')",
                params![id, idx],
            )?;
        }
        assert_eq!(ordering::next_index(conn, OrderScope::Tables, "b")?, 3);
        ordering::reindex(conn, OrderScope::Tables, "b")?;
        let mut stmt = conn.prepare("SELECT order_index FROM grid_tables WHERE base_id = 'b' ORDER BY order_index")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
    .expect("order");
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(ordering::is_dense(&indices));
    assert!(!ordering::is_dense(&[0, 2]));
}

#[test]
fn config_file_drives_policy_and_rejects_garbage() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("store");
    fs::create_dir_all(&root).expect("mkdir");

    assert_eq!(config::load_config(&root).expect("defaults"), config::GridConfig::default());

    fs::write(
        config::config_path(&root),
        "[grid]\norphaned_keys = \"prune\"\n\n[builder]\nreply_delay_ms = 5\n",
    )
    .expect("write");
    let cfg = config::load_config(&root).expect("load");
    assert_eq!(cfg.grid.orphaned_keys, OrphanPolicy::Prune);
    assert_eq!(cfg.builder.reply_delay_ms, 5);
    assert_eq!(cfg.default_plan, config::DEFAULT_PLAN_ID);

    fs::write(config::config_path(&root), "[grid]\norphaned_keys = \"shred\"\n").expect("write");
    assert!(matches!(config::load_config(&root), Err(GridError::ConfigError(_))));
    assert!(matches!(initialize_store(&root), Err(GridError::ConfigError(_))));
    assert!(!db::grid_db_path(&root).exists());
}

#[test]
fn session_lifecycle() {
    assert!(matches!(Session::sign_in("  ", None), Err(GridError::Unauthenticated(_))));
    let mut session = Session::sign_in("ada", Some("ada@example.com")).expect("sign in");
    assert_eq!(session.require_active().expect("active"), "ada");
    session.sign_out();
    assert_eq!(session.state(), SessionState::SignedOut);
    assert!(matches!(session.require_active(), Err(GridError::Unauthenticated(_))));
}

#[test]
fn cell_coercion_rules() {
    assert_eq!(cell::coerce(FieldType::Number, "abc").expect("number"), CellValue::Number(0.0));
    assert_eq!(cell::coerce(FieldType::Checkbox, "true").expect("cb"), CellValue::Checkbox(true));
    assert_eq!(cell::coerce(FieldType::Checkbox, "false").expect("cb"), CellValue::Checkbox(false));
    assert_eq!(cell::coerce(FieldType::Checkbox, "TRUE").expect("cb"), CellValue::Checkbox(false));
    assert_eq!(cell::coerce(FieldType::Checkbox, "1").expect("cb"), CellValue::Checkbox(false));
    assert!(cell::coerce(FieldType::Date, "next tuesday").is_err());

    let options = FieldOptions::with_choices(["Lead", "Won"]);
    assert!(cell::parse_input(FieldType::Select, &options, "Won").is_ok());
    assert!(cell::parse_input(FieldType::Select, &options, "Lost").is_err());
    assert!(cell::parse_input(FieldType::Url, &FieldOptions::default(), "https://example.com").is_ok());
    assert!(cell::parse_input(FieldType::Phone, &FieldOptions::default(), "12").is_err());
}

#[test]
fn confirmation_and_schema_catalog() {
    assert!(require_confirmation(true, "table delete").is_ok());
    assert!(matches!(
        require_confirmation(false, "table delete"),
        Err(GridError::ValidationError(_))
    ));

    let catalog = schema_catalog();
    let names: Vec<&str> = catalog["subsystems"]
        .as_array()
        .expect("subsystems")
        .iter()
        .filter_map(|s| s["name"].as_str())
        .collect();
    for expected in ["broker", "workspace", "base", "table", "field", "record", "usage", "builder", "pipeline", "marketplace"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
}
