use std::path::PathBuf;

use crate::models::{LogStatus, RequirementCategory};

/// Failures of the durable key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Reasons a backup file is refused. State is never touched when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("invalid backup file: {0}")]
    InvalidBackup(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write backup: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Problems turning a stored document into the current schema.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("document has no usable version field")]
    Unversioned,

    #[error("document version {0} is newer than this build understands")]
    Unsupported(u32),

    #[error("document is missing the {0} collection")]
    MissingCollection(&'static str),

    #[error("legacy document is malformed: {0}")]
    Malformed(String),

    #[error("document does not match the schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Domain constraint violations raised by update functions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} cannot move from {from} to {to}")]
    IllegalTransition {
        kind: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("entry must be confirmed free of patient identifiers")]
    PhiNotConfirmed,

    #[error("shift end time must be after start time and break")]
    InvalidShiftTimes,

    #[error("template {template} ({category}) is derived from logs and does not take evidence")]
    EvidenceNotAccepted {
        template: String,
        category: RequirementCategory,
    },

    #[error("profile {0} does not exist")]
    UnknownProfile(String),

    #[error("{kind} needs {missing}")]
    Incomplete {
        kind: &'static str,
        missing: &'static str,
    },

    #[error("passing score {0} is above 100")]
    InvalidPassingScore(u32),

    #[error("{kind} {id} is no longer active")]
    Inactive { kind: &'static str, id: String },

    #[error("quiz {0} has already been completed and does not allow retakes")]
    RetakeNotAllowed(String),

    #[error("{student} already has attendance recorded for class {class}")]
    AlreadyAttended { class: String, student: String },

    #[error("quiz {0} must be passed before CE credit is recorded")]
    QuizNotPassed(String),
}

impl DomainError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn incomplete(kind: &'static str, missing: &'static str) -> Self {
        DomainError::Incomplete { kind, missing }
    }

    pub fn inactive(kind: &'static str, id: impl Into<String>) -> Self {
        DomainError::Inactive {
            kind,
            id: id.into(),
        }
    }

    pub fn illegal_log_transition(
        kind: &'static str,
        id: impl Into<String>,
        from: LogStatus,
        to: LogStatus,
    ) -> Self {
        DomainError::IllegalTransition {
            kind,
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
