//! Veil Storage Layer
//!
//! SQLite-backed flat key/value persistence. Keys are colon-delimited
//! key paths, values are JSON documents.

mod database;
mod error;
mod keypath;
mod migrations;

pub use database::Database;
pub use error::StorageError;
pub use keypath::{KeyPath, KEY_SEPARATOR};

pub type Result<T> = std::result::Result<T, StorageError>;
