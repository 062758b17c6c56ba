use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};

use clintrack::approval::{self, ShiftDraft};
use clintrack::models::{Answer, Decision, LogKind, LogStatus, NotificationType, ScheduleStatus};
use clintrack::persistence::{load, DEFAULT_STORAGE_KEY};
use clintrack::progress::{self, CompletionStatus};
use clintrack::scheduling;
use clintrack::seed::{AIRWAY_CLASS_ID, AIRWAY_QUIZ_ID};
use clintrack::storage::{MemoryStorage, SqliteStorage};
use clintrack::training;
use clintrack::{DomainError, ImportError, ImportMode, Store, StoreConfig};

const STUDENT: &str = "user-student-1";
const PRECEPTOR: &str = "user-preceptor-1";
const COORDINATOR: &str = "user-coordinator-1";

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

fn clock(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

fn er_shift() -> ShiftDraft {
    ShiftDraft {
        student_id: STUDENT.to_string(),
        date: date(3, 10),
        start_time: clock(8, 0),
        end_time: clock(16, 30),
        break_minutes: 30,
        site_id: "site-city-er".to_string(),
        preceptor_id: Some(PRECEPTOR.to_string()),
        notes: None,
        no_phi: true,
    }
}

async fn open_store(storage: &Arc<MemoryStorage>) -> Store {
    Store::open(storage.clone(), StoreConfig::default()).await
}

#[tokio::test]
async fn full_approval_cycle() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;

    store
        .try_update(|state| approval::add_shift_log(state, er_shift()))
        .unwrap();
    let log = store.state().shift_logs[0].clone();
    assert_eq!(log.computed_hours, 8.0);
    assert_eq!(log.status, LogStatus::Pending);

    store
        .try_update(|state| approval::submit(state, LogKind::Shift, &log.id, STUDENT))
        .unwrap();
    assert_eq!(store.state().shift_logs[0].status, LogStatus::Submitted);

    store
        .try_update(|state| {
            approval::decide(
                state,
                LogKind::Shift,
                &log.id,
                Decision::Approved,
                PRECEPTOR,
                Some("Good work"),
            )
        })
        .unwrap();

    let state = store.state();
    assert_eq!(state.shift_logs[0].status, LogStatus::Approved);
    assert_eq!(state.approvals.len(), 1);
    assert_eq!(state.approvals[0].decision, Decision::Approved);
    assert_eq!(state.approvals[0].comments.as_deref(), Some("Good work"));
    assert_eq!(state.notifications.len(), 1);
    assert_eq!(state.notifications[0].user_id, STUDENT);
    assert_eq!(state.notifications[0].notification_type, NotificationType::Approval);

    let hours = state.template("rt-ems-hours").unwrap();
    let progress = progress::compute_progress(&state, STUDENT, hours);
    assert_eq!(progress.current, 8.0);
    assert_eq!(progress.status, CompletionStatus::InProgress);

    store.flush().await;
    let persisted = load(storage.as_ref(), DEFAULT_STORAGE_KEY).await;
    assert_eq!(persisted.approvals, state.approvals);
    assert_eq!(persisted.shift_logs[0].status, LogStatus::Approved);
}

#[tokio::test]
async fn illegal_decision_leaves_state_untouched() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;
    store
        .try_update(|state| approval::add_shift_log(state, er_shift()))
        .unwrap();
    let before = store.state();
    let id = before.shift_logs[0].id.clone();

    let result = store.try_update(|state| {
        approval::decide(state, LogKind::Shift, &id, Decision::Approved, PRECEPTOR, None)
    });

    assert!(matches!(result, Err(DomainError::IllegalTransition { .. })));
    assert_eq!(*store.state(), *before);
}

#[tokio::test]
async fn capacity_warning_does_not_block_requests() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;
    let site = "site-regional-icu";
    let day = date(4, 2);

    store
        .try_update(|state| scheduling::set_capacity(state, site, day, 1, COORDINATOR))
        .unwrap();
    store.update(|state| {
        scheduling::assign_student(state, "user-student-2", site, day, COORDINATOR, None)
    });
    assert!(scheduling::capacity_warning(&store.state(), site, day).is_some());

    store.update(|state| scheduling::request_slot(state, STUDENT, site, day, None));

    let state = store.state();
    let requests: Vec<_> = state
        .schedule_requests
        .iter()
        .filter(|r| r.site_id == site && r.date == day)
        .collect();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].status, ScheduleStatus::Requested);
    assert_eq!(requests[1].student_id, STUDENT);
    assert_eq!(scheduling::approved_count_for(&state, site, day), 1);
}

#[tokio::test]
async fn invalid_backup_is_rejected_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-backup.json");
    std::fs::write(&path, r#"{"foo": 1}"#).unwrap();

    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;
    let before = store.state();

    let result = store.import_backup(&path, ImportMode::Merge).await;
    assert!(matches!(result, Err(ImportError::InvalidBackup(_))));
    assert_eq!(*store.state(), *before);
}

#[tokio::test]
async fn evidence_progress_only_increases() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;
    let evals = store.state().template("rt-ems-eval").cloned().unwrap();

    let mut last = 0.0;
    for _ in 0..4 {
        store
            .try_update(|state| progress::add_evidence(state, STUDENT, &evals, None))
            .unwrap();
        let current = progress::compute_progress(&store.state(), STUDENT, &evals).current;
        assert!(current > last);
        last = current;
    }
    assert_eq!(last, 4.0);
}

#[tokio::test]
async fn export_then_replace_import_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;
    store
        .try_update(|state| approval::add_shift_log(state, er_shift()))
        .unwrap();
    let exported = store.export_backup(dir.path()).unwrap();

    store.reset();
    assert!(store.state().shift_logs.is_empty());

    store.import_backup(&exported, ImportMode::Replace).await.unwrap();
    let state = store.state();
    assert_eq!(state.shift_logs.len(), 1);
    assert_eq!(state.audit.last().unwrap().action, "import-replace");
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("clintrack.db").display());
    let config = StoreConfig {
        debounce: Duration::from_millis(10),
        ..StoreConfig::default()
    };

    {
        let storage = Arc::new(SqliteStorage::connect(&url).await.unwrap());
        let store = Store::open(storage, config.clone()).await;
        store.login(STUDENT).unwrap();
        store
            .try_update(|state| approval::add_shift_log(state, er_shift()))
            .unwrap();
        store.flush().await;
    }

    let storage = Arc::new(SqliteStorage::connect(&url).await.unwrap());
    let store = Store::open(storage, config).await;
    let state = store.state();
    assert_eq!(state.active_profile_id.as_deref(), Some(STUDENT));
    assert!(state.is_logged_in);
    assert_eq!(state.shift_logs.len(), 1);
    assert_eq!(state.shift_logs[0].computed_hours, 8.0);
}

#[tokio::test]
async fn passing_the_quiz_unlocks_ce_credit() {
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(&storage).await;

    let blocked =
        store.try_update(|state| training::record_ce_attendance(state, AIRWAY_CLASS_ID, STUDENT));
    assert_eq!(blocked, Err(DomainError::QuizNotPassed(AIRWAY_QUIZ_ID.to_string())));

    let answers: BTreeMap<String, Answer> = [
        ("q-airway-first", Answer::One("Jaw thrust".to_string())),
        (
            "q-airway-signs",
            Answer::Many(vec!["Gurgling".to_string(), "Stridor".to_string()]),
        ),
        ("q-airway-opa", Answer::One("False".to_string())),
    ]
    .into_iter()
    .map(|(id, answer)| (id.to_string(), answer))
    .collect();
    store
        .try_update(|state| {
            training::submit_attempt(state, AIRWAY_QUIZ_ID, STUDENT, answers, Utc::now())
        })
        .unwrap();
    store
        .try_update(|state| training::record_ce_attendance(state, AIRWAY_CLASS_ID, STUDENT))
        .unwrap();

    let state = store.state();
    assert_eq!(state.quiz_attempts[0].score, 75);
    assert!(state.quiz_attempts[0].passed);
    assert_eq!(training::ce_hours_for(&state, STUDENT), 2.0);

    store.flush().await;
    let persisted = load(storage.as_ref(), DEFAULT_STORAGE_KEY).await;
    assert_eq!(persisted.ce_attendances, state.ce_attendances);
    assert_eq!(persisted.quiz_attempts, state.quiz_attempts);
}
