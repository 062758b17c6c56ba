//! The state container: one `AppState` for the session, changed only through updater
//! functions, with every change published to subscribers and queued for persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{DomainError, ExportError, ImportError};
use crate::ids::new_id;
use crate::models::{AppState, AuditEvent, Notification, NotificationType};
use crate::persistence::{self, Saver, SaverHandle, DEFAULT_STORAGE_KEY};
use crate::seed::default_state;
use crate::storage::Storage;

/// Actor recorded on audit events when nobody is logged in.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub storage_key: String,
    /// Quiet period before a burst of updates is written.
    pub debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Union with the current document, incoming records winning by id.
    Merge,
    /// Discard the current document entirely.
    Replace,
}

struct Shared {
    state: watch::Sender<Arc<AppState>>,
    // Serializes every read-apply-publish cycle, including the saver's lastSavedAt stamp.
    write_lock: Mutex<()>,
}

pub struct Store {
    shared: Arc<Shared>,
    saver: SaverHandle,
    config: StoreConfig,
}

impl Store {
    /// Loads the stored document (or the seed) and starts the background saver.
    /// Must be called inside a tokio runtime.
    pub async fn open(storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        let initial = persistence::load(storage.as_ref(), &config.storage_key).await;
        Self::with_state(storage, config, initial)
    }

    /// Starts a container around `initial` without reading storage first.
    /// Must be called inside a tokio runtime.
    pub fn with_state(storage: Arc<dyn Storage>, config: StoreConfig, initial: AppState) -> Self {
        let (state, _) = watch::channel(Arc::new(initial));
        let shared = Arc::new(Shared {
            state,
            write_lock: Mutex::new(()),
        });

        let stamp_target = Arc::downgrade(&shared);
        let saver = Saver::spawn(
            storage,
            config.storage_key.clone(),
            config.debounce,
            move |stamp| {
                if let Some(shared) = stamp_target.upgrade() {
                    let _guard = shared.write_lock.lock();
                    shared
                        .state
                        .send_modify(|state| Arc::make_mut(state).last_saved_at = stamp);
                }
            },
        );

        Self {
            shared,
            saver,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Read-only snapshot of the current document.
    pub fn state(&self) -> Arc<AppState> {
        self.shared.state.borrow().clone()
    }

    /// Receiver that observes every published document.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.shared.state.subscribe()
    }

    /// Applies `updater` to the current document and queues the result for saving.
    pub fn update<F>(&self, updater: F)
    where
        F: FnOnce(AppState) -> AppState,
    {
        let _guard = self.shared.write_lock.lock();
        let prev = AppState::clone(&self.shared.state.borrow());
        self.publish(updater(prev));
    }

    /// Like [`Store::update`], but a failing updater leaves the document untouched.
    pub fn try_update<F, E>(&self, updater: F) -> Result<(), E>
    where
        F: FnOnce(AppState) -> Result<AppState, E>,
    {
        let _guard = self.shared.write_lock.lock();
        let prev = AppState::clone(&self.shared.state.borrow());
        let next = updater(prev)?;
        self.publish(next);
        Ok(())
    }

    // Caller holds the write lock.
    fn publish(&self, next: AppState) {
        let next = Arc::new(next);
        self.shared.state.send_replace(next.clone());
        self.saver.schedule(next);
    }

    /// Replaces the document with the seed and deletes the stored copy.
    pub fn reset(&self) {
        let _guard = self.shared.write_lock.lock();
        self.shared.state.send_replace(Arc::new(default_state()));
        self.saver.clear();
        tracing::info!("state reset to defaults");
    }

    /// Waits until every change made so far has been written.
    pub async fn flush(&self) {
        self.saver.flush().await;
    }

    pub fn record_audit_event(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        details: Option<&str>,
    ) {
        self.update(|mut state| {
            let actor = state
                .active_profile_id
                .clone()
                .unwrap_or_else(|| SYSTEM_ACTOR.to_string());
            state.push_audit(audit_event(action, entity_type, entity_id, &actor, details));
            state
        });
    }

    pub fn notify(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        notification_type: NotificationType,
        link_to: Option<&str>,
    ) {
        self.update(|mut state| {
            state.push_notification(notification(
                user_id,
                title,
                message,
                notification_type,
                link_to,
            ));
            state
        });
    }

    pub fn login(&self, profile_id: &str) -> Result<(), DomainError> {
        self.try_update(|mut state| {
            if state.profile(profile_id).is_none() {
                return Err(DomainError::UnknownProfile(profile_id.to_string()));
            }
            state.active_profile_id = Some(profile_id.to_string());
            state.is_logged_in = true;
            Ok(state)
        })
    }

    pub fn logout(&self) {
        self.update(|mut state| {
            state.active_profile_id = None;
            state.is_logged_in = false;
            state
        });
    }

    pub fn set_onboarding_seen(&self, seen: bool) {
        self.update(|mut state| {
            state.has_seen_onboarding = seen;
            state
        });
    }

    /// Parses `path` and folds it into the document. Nothing changes unless the file is valid.
    pub async fn import_backup(&self, path: &Path, mode: ImportMode) -> Result<(), ImportError> {
        let incoming = persistence::import_from_file(path).await?;
        self.apply_import(incoming, mode);
        Ok(())
    }

    pub fn apply_import(&self, incoming: AppState, mode: ImportMode) {
        let details = format!(
            "{} profiles, {} shift logs, {} skill logs",
            incoming.profiles.len(),
            incoming.shift_logs.len(),
            incoming.skill_logs.len()
        );
        self.update(|current| {
            let mut next = match mode {
                ImportMode::Merge => persistence::merge(&current, &incoming),
                ImportMode::Replace => incoming,
            };
            let actor = current
                .active_profile_id
                .clone()
                .unwrap_or_else(|| SYSTEM_ACTOR.to_string());
            let action = match mode {
                ImportMode::Merge => "import-merge",
                ImportMode::Replace => "import-replace",
            };
            next.push_audit(audit_event(action, "appState", "backup", &actor, Some(&details)));
            next
        });
        tracing::info!(?mode, "backup imported");
    }

    pub fn export_backup(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        persistence::export_to_file(&self.state(), dir)
    }
}

/// Builds an audit entry stamped now.
pub fn audit_event(
    action: &str,
    entity_type: &str,
    entity_id: &str,
    user_id: &str,
    details: Option<&str>,
) -> AuditEvent {
    AuditEvent {
        id: new_id("audit"),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        user_id: user_id.to_string(),
        timestamp: Utc::now(),
        details: details.map(str::to_string),
    }
}

/// Builds an unread notification stamped now.
pub fn notification(
    user_id: &str,
    title: &str,
    message: &str,
    notification_type: NotificationType,
    link_to: Option<&str>,
) -> Notification {
    Notification {
        id: new_id("notif"),
        user_id: user_id.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        notification_type,
        read: false,
        link_to: link_to.map(str::to_string),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::load;
    use crate::storage::MemoryStorage;

    async fn open(storage: &Arc<MemoryStorage>) -> Store {
        Store::open(storage.clone(), StoreConfig::default()).await
    }

    #[tokio::test]
    async fn update_publishes_and_persists() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;
        let mut rx = store.subscribe();

        store.set_onboarding_seen(true);
        assert!(store.state().has_seen_onboarding);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().has_seen_onboarding);

        store.flush().await;
        let stored = load(storage.as_ref(), DEFAULT_STORAGE_KEY).await;
        assert!(stored.has_seen_onboarding);
        assert_eq!(store.state().last_saved_at, stored.last_saved_at);
    }

    #[tokio::test]
    async fn with_state_starts_from_given_document() {
        let storage = Arc::new(MemoryStorage::new());
        let mut initial = default_state();
        initial.has_seen_onboarding = true;

        let store = Store::with_state(storage.clone(), StoreConfig::default(), initial.clone());
        assert_eq!(*store.state(), initial);
        assert_eq!(storage.raw(DEFAULT_STORAGE_KEY), None);

        store.login("user-student-1").unwrap();
        store.flush().await;
        let stored = load(storage.as_ref(), DEFAULT_STORAGE_KEY).await;
        assert!(stored.has_seen_onboarding);
        assert!(stored.is_logged_in);
    }

    #[tokio::test]
    async fn each_updater_sees_prior_updates() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;

        for i in 0..5 {
            store.record_audit_event("touch", "site", &format!("site-{i}"), None);
        }
        let state = store.state();
        let audit = &state.audit;
        assert_eq!(audit.len(), 5);
        assert_eq!(audit[4].entity_id, "site-4");
        assert_eq!(audit[0].user_id, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn failed_update_leaves_state_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;
        let before = store.state();

        let result = store.login("nobody");
        assert_eq!(result, Err(DomainError::UnknownProfile("nobody".to_string())));
        assert_eq!(*store.state(), *before);
    }

    #[tokio::test]
    async fn login_and_logout_touch_only_session_fields() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;
        let profiles = store.state().profiles.clone();

        store.login("user-preceptor-1").unwrap();
        let state = store.state();
        assert!(state.is_logged_in);
        assert_eq!(state.active_profile().unwrap().name, "Dr. Sarah Preceptor");

        store.record_audit_event("approved", "shift", "shift-1", Some("Comment: ok"));
        assert_eq!(store.state().audit[0].user_id, "user-preceptor-1");

        store.logout();
        let state = store.state();
        assert!(!state.is_logged_in);
        assert_eq!(state.active_profile_id, None);
        assert_eq!(state.profiles, profiles);
    }

    #[tokio::test]
    async fn notify_appends_unread_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;

        store.notify(
            "user-student-1",
            "Reminder",
            "Upload your BLS card",
            NotificationType::Reminder,
            Some("/requirements"),
        );
        let state = store.state();
        assert_eq!(state.notifications.len(), 1);
        assert!(!state.notifications[0].read);
        assert_eq!(state.notifications[0].link_to.as_deref(), Some("/requirements"));
    }

    #[tokio::test]
    async fn reset_restores_seed_and_clears_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;

        store.login("user-admin-1").unwrap();
        store.flush().await;
        assert!(storage.raw(DEFAULT_STORAGE_KEY).is_some());

        store.reset();
        store.flush().await;
        assert!(!store.state().is_logged_in);
        assert_eq!(storage.raw(DEFAULT_STORAGE_KEY), None);
    }

    #[tokio::test]
    async fn reopening_sees_flushed_changes() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let store = open(&storage).await;
            store.login("user-student-1").unwrap();
            store.flush().await;
        }
        let reopened = open(&storage).await;
        assert_eq!(
            reopened.state().active_profile_id.as_deref(),
            Some("user-student-1")
        );
    }

    #[tokio::test]
    async fn bad_import_changes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"foo": 1}"#).unwrap();

        let before = store.state();
        let result = store.import_backup(&path, ImportMode::Merge).await;
        assert!(matches!(result, Err(ImportError::InvalidBackup(_))));
        assert_eq!(*store.state(), *before);
    }

    #[tokio::test]
    async fn merge_import_adds_records_and_audits() {
        let storage = Arc::new(MemoryStorage::new());
        let store = open(&storage).await;
        let dir = tempfile::tempdir().unwrap();

        let mut other = default_state();
        other.programs[0].name = "EMS Paramedic (2027 catalog)".to_string();
        let path = persistence::export_to_file(&other, dir.path()).unwrap();

        store.import_backup(&path, ImportMode::Merge).await.unwrap();
        let state = store.state();
        assert_eq!(state.programs.len(), other.programs.len());
        assert_eq!(state.programs[0].name, "EMS Paramedic (2027 catalog)");
        assert_eq!(state.audit.last().unwrap().action, "import-merge");
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(runtime.block_on(open(&storage)));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.record_audit_event("touch", "site", &format!("{worker}-{i}"), None);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.state().audit.len(), 100);
    }
}
