//! Vela storage layer
//!
//! SQLite-based persistence for the tab store: a mutex-guarded connection
//! wrapper, schema migrations, and the repository adapter the tab core
//! talks to.

mod database;
mod error;
mod migrations;
mod repository;

pub use database::Database;
pub use error::StorageError;
pub use repository::SqliteTabRepository;

pub type Result<T> = std::result::Result<T, StorageError>;
