use gridbase::core::error::GridError;
use gridbase::core::store::{Session, Store};
use gridbase::initialize_store;
use gridbase::plugins::builder::{
    self, BuildCapability, BuildReply, BuildRequest, ChangeStatus, ProjectStatus, StubCapability,
};
use gridbase::core::db;
use gridbase::plugins::pipeline::{self, RunStatus, STAGES, StageStatus};
use gridbase::plugins::workspace;
use std::cell::RefCell;
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store, Session) {
    let tmp = tempdir().unwrap();
    let store = initialize_store(&tmp.path().join("store")).unwrap();
    let session = Session::sign_in("ada", None).unwrap();
    workspace::sign_up(&store, &session).unwrap();
    (tmp, store, session)
}

/// Records every request it sees and never proposes files.
struct Recording {
    seen: RefCell<Vec<BuildRequest>>,
}

impl BuildCapability for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn submit(&self, request: &BuildRequest) -> Result<BuildReply, GridError> {
        self.seen.borrow_mut().push(request.clone());
        Ok(BuildReply {
            summary: "noted".to_string(),
            proposed_files: Vec::new(),
        })
    }
}

/// Always fails, as an unreachable backend would.
struct Offline;

impl BuildCapability for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn submit(&self, _request: &BuildRequest) -> Result<BuildReply, GridError> {
        Err(GridError::validation("builder backend unreachable"))
    }
}

/// Succeeds at every stage, but on its first call installs a trigger that
/// rejects recording a successful `review` stage.
struct BlocksReviewRecord {
    db_path: std::path::PathBuf,
    armed: RefCell<bool>,
}

impl BuildCapability for BlocksReviewRecord {
    fn name(&self) -> &str {
        "blocks-review"
    }

    fn submit(&self, _request: &BuildRequest) -> Result<BuildReply, GridError> {
        if !*self.armed.borrow() {
            let conn = rusqlite::Connection::open(&self.db_path)?;
            conn.execute_batch(
                "CREATE TRIGGER block_review BEFORE UPDATE ON pipeline_stages
                 WHEN NEW.stage = 'review' AND NEW.status = 'succeeded'
                 BEGIN SELECT RAISE(ABORT, 'stage store unavailable'); END;",
            )?;
            *self.armed.borrow_mut() = true;
        }
        Ok(BuildReply {
            summary: "ok".to_string(),
            proposed_files: Vec::new(),
        })
    }
}

#[test]
fn test_prompt_stores_transcript_and_pending_change() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "storefront").unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    let chat = builder::create_chat(&store, &session, &project.id, "First").unwrap();

    let outcome = builder::submit_prompt(
        &store,
        &session,
        &StubCapability::default(),
        &chat.id,
        "add a checkout page",
    )
    .unwrap();
    assert_eq!(outcome.user_message.role, "user");
    assert_eq!(outcome.reply.role, "assistant");
    let change = outcome.change.unwrap();
    assert_eq!(change.status, ChangeStatus::Pending);
    assert_eq!(change.files.len(), 2);

    let messages = builder::list_messages(&store, &session, &chat.id).unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant"]);
    assert_eq!(messages[0].content, "add a checkout page");

    let changes = builder::list_changes(&store, &session, &chat.id).unwrap();
    assert_eq!(changes, vec![change]);
}

#[test]
fn test_reply_without_files_creates_no_change() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let chat = builder::create_chat(&store, &session, &project.id, "Chat").unwrap();
    let capability = Recording {
        seen: RefCell::new(Vec::new()),
    };

    let outcome = builder::submit_prompt(&store, &session, &capability, &chat.id, "hello").unwrap();
    assert!(outcome.change.is_none());
    assert_eq!(capability.seen.borrow().len(), 1);
    assert_eq!(capability.seen.borrow()[0].project_id, project.id);
    assert!(capability.seen.borrow()[0].stage.is_none());
    assert!(builder::list_changes(&store, &session, &chat.id).unwrap().is_empty());
}

#[test]
fn test_empty_prompt_is_rejected() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let chat = builder::create_chat(&store, &session, &project.id, "Chat").unwrap();
    assert!(matches!(
        builder::submit_prompt(&store, &session, &StubCapability::default(), &chat.id, "   "),
        Err(GridError::ValidationError(_))
    ));
    assert!(builder::list_messages(&store, &session, &chat.id).unwrap().is_empty());
}

#[test]
fn test_change_decisions_only_from_pending() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let chat = builder::create_chat(&store, &session, &project.id, "Chat").unwrap();
    let stub = StubCapability::default();
    let first = builder::submit_prompt(&store, &session, &stub, &chat.id, "one").unwrap().change.unwrap();
    let second = builder::submit_prompt(&store, &session, &stub, &chat.id, "two").unwrap().change.unwrap();

    let approved = builder::approve_change(&store, &session, &first.id).unwrap();
    assert_eq!(approved.status, ChangeStatus::Approved);
    assert_eq!(approved.decided_by.as_deref(), Some("ada"));
    assert!(approved.decided_at.is_some());

    assert!(matches!(
        builder::reject_change(&store, &session, &first.id),
        Err(GridError::ValidationError(_))
    ));
    assert!(matches!(
        builder::approve_change(&store, &session, &first.id),
        Err(GridError::ValidationError(_))
    ));

    let rejected = builder::reject_change(&store, &session, &second.id).unwrap();
    assert_eq!(rejected.status, ChangeStatus::Rejected);
}

#[test]
fn test_other_users_cannot_touch_projects() {
    let (_tmp, store, ada) = test_store();
    let bob = Session::sign_in("bob", None).unwrap();
    workspace::sign_up(&store, &bob).unwrap();
    let project = builder::create_project(&store, &ada, "Shop", "").unwrap();

    assert!(matches!(
        builder::create_chat(&store, &bob, &project.id, "Sneaky"),
        Err(GridError::NotFound(_))
    ));
    assert!(matches!(
        builder::archive_project(&store, &bob, &project.id),
        Err(GridError::NotFound(_))
    ));
    assert!(builder::list_projects(&store, &bob).unwrap().is_empty());
}

#[test]
fn test_archived_project_rejects_new_chats_and_runs() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let archived = builder::archive_project(&store, &session, &project.id).unwrap();
    assert_eq!(archived.status, ProjectStatus::Archived);

    assert!(matches!(
        builder::create_chat(&store, &session, &project.id, "Late"),
        Err(GridError::ValidationError(_))
    ));
    assert!(matches!(
        pipeline::start_pipeline(&store, &session, &StubCapability::default(), &project.id, "build"),
        Err(GridError::ValidationError(_))
    ));
}

#[test]
fn test_pipeline_runs_all_stages_in_order() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let capability = Recording {
        seen: RefCell::new(Vec::new()),
    };

    let report = pipeline::start_pipeline(&store, &session, &capability, &project.id, "ship it").unwrap();
    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(report.run.capability, "recording");
    assert!(report.run.finished_at.is_some());

    let stages: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, STAGES.to_vec());
    assert!(report.stages.iter().all(|s| s.status == StageStatus::Succeeded));

    let seen: Vec<Option<String>> = capability.seen.borrow().iter().map(|r| r.stage.clone()).collect();
    let expected: Vec<Option<String>> = STAGES.iter().map(|s| Some(s.to_string())).collect();
    assert_eq!(seen, expected);

    assert_eq!(pipeline::get_run(&store, &session, &report.run.id).unwrap(), report);
    assert_eq!(pipeline::list_runs(&store, &session, &project.id).unwrap().len(), 1);
}

#[test]
fn test_pipeline_failure_skips_remaining_stages() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let capability = StubCapability::default().failing_at("generate");

    let report = pipeline::start_pipeline(&store, &session, &capability, &project.id, "ship it").unwrap();
    assert_eq!(report.run.status, RunStatus::Failed);
    let statuses: Vec<StageStatus> = report.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Succeeded,
            StageStatus::Failed,
            StageStatus::Skipped,
            StageStatus::Skipped
        ]
    );
    assert!(report.stages[1].output.contains("generate"));
}

#[test]
fn test_failed_capability_keeps_user_message() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let chat = builder::create_chat(&store, &session, &project.id, "Chat").unwrap();

    let err = builder::submit_prompt(&store, &session, &Offline, &chat.id, "add search").unwrap_err();
    assert!(matches!(err, GridError::ValidationError(ref msg) if msg.contains("unreachable")));

    let messages = builder::list_messages(&store, &session, &chat.id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "add search");
    assert!(builder::list_changes(&store, &session, &chat.id).unwrap().is_empty());
}

#[test]
fn test_pipeline_recording_error_closes_run_as_failed() {
    let (_tmp, store, session) = test_store();
    let project = builder::create_project(&store, &session, "Shop", "").unwrap();
    let capability = BlocksReviewRecord {
        db_path: db::grid_db_path(&store.root),
        armed: RefCell::new(false),
    };

    let err = pipeline::start_pipeline(&store, &session, &capability, &project.id, "ship it").unwrap_err();
    assert!(matches!(err, GridError::RusqliteError(_)));

    let runs = pipeline::list_runs(&store, &session, &project.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].finished_at.is_some());

    let report = pipeline::get_run(&store, &session, &runs[0].id).unwrap();
    let statuses: Vec<StageStatus> = report.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Succeeded,
            StageStatus::Succeeded,
            StageStatus::Skipped,
            StageStatus::Skipped
        ]
    );
}
