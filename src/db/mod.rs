//! SQLite persistence for the engine.
//!
//! This module provides:
//! - Database initialization and the idempotent schema
//! - Connection options (foreign keys, WAL, busy timeout)
//! - `Repository`, implementing every store trait over one pool

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
