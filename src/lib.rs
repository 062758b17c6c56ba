//! Core of a clinical-training tracker: the state document, its persistence, and the
//! derivations and workflows built on top of it.

pub mod admin;
pub mod approval;
pub mod error;
pub mod ids;
pub mod inbox;
pub mod models;
pub mod persistence;
pub mod progress;
pub mod report;
pub mod scheduling;
pub mod seed;
pub mod storage;
pub mod store;
pub mod training;

pub use error::{DomainError, ExportError, ImportError, MigrationError, StorageError};
pub use models::AppState;
pub use store::{ImportMode, Store, StoreConfig};
