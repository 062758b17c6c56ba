//! Moving the state document in and out of durable storage and backup files.
//!
//! `load` and `save` never fail past their own boundary: problems are logged and the
//! session carries on in memory. Backup import is the one path that reports typed errors,
//! and it never hands back a partially applied document.

mod merge;
mod migrate;
mod saver;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::{ExportError, ImportError};
use crate::models::AppState;
use crate::seed::default_state;
use crate::storage::Storage;

pub use merge::{append_new, merge, merge_by_id};
pub use migrate::{detect_version, migrate};
pub use saver::{Saver, SaverHandle};

pub const DEFAULT_STORAGE_KEY: &str = "clintrack-app-state";

/// Reads the stored document, upgrading older schemas. Anything missing or unusable yields
/// the seed.
pub async fn load(storage: &dyn Storage, key: &str) -> AppState {
    let serialized = match storage.get(key).await {
        Ok(Some(serialized)) => serialized,
        Ok(None) => {
            tracing::info!(key, "no stored state, starting from defaults");
            return default_state();
        }
        Err(err) => {
            tracing::warn!(
                key,
                error = %err,
                "failed to read stored state, starting from defaults"
            );
            return default_state();
        }
    };

    let raw: Value = match serde_json::from_str(&serialized) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(
                key,
                error = %err,
                "stored state is not valid JSON, starting from defaults"
            );
            return default_state();
        }
    };

    match migrate(raw) {
        Ok(state) => state,
        Err(err) => {
            tracing::warn!(
                key,
                error = %err,
                "stored state is incompatible, starting from defaults"
            );
            default_state()
        }
    }
}

/// Stamps `lastSavedAt`, serializes and writes. Returns the stamp on success; failures are
/// logged and swallowed.
pub async fn save(storage: &dyn Storage, key: &str, state: &AppState) -> Option<DateTime<Utc>> {
    let stamp = Utc::now();
    let mut stamped = state.clone();
    stamped.last_saved_at = stamp;

    let serialized = match serde_json::to_string(&stamped) {
        Ok(serialized) => serialized,
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to serialize state");
            return None;
        }
    };

    match storage.set(key, &serialized).await {
        Ok(()) => {
            tracing::debug!(key, bytes = serialized.len(), "state saved");
            Some(stamp)
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to save state, continuing in memory");
            None
        }
    }
}

pub fn backup_file_name(date: NaiveDate) -> String {
    format!("clintrack-backup-{}.json", date.format("%Y-%m-%d"))
}

pub fn export_json(state: &AppState) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Writes a pretty-printed backup named after today's date into `dir`.
pub fn export_to_file(state: &AppState, dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(backup_file_name(Utc::now().date_naive()));
    std::fs::write(&path, export_json(state)?)?;
    tracing::info!(path = %path.display(), "backup exported");
    Ok(path)
}

/// Validates and decodes backup contents without touching any live state.
pub fn parse_backup(contents: &str) -> Result<AppState, ImportError> {
    let raw: Value = serde_json::from_str(contents)?;

    if !raw.get("version").is_some_and(migrate::is_truthy) {
        return Err(ImportError::InvalidBackup(
            "missing version field".to_string(),
        ));
    }
    if !raw.get("profiles").is_some_and(Value::is_array) {
        return Err(ImportError::InvalidBackup(
            "missing profiles collection".to_string(),
        ));
    }

    migrate(raw).map_err(|err| ImportError::InvalidBackup(err.to_string()))
}

pub async fn import_from_file(path: &Path) -> Result<AppState, ImportError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_backup(&contents)
}
