//! Local persistence for the WGPT chat client.

pub mod db;
pub mod local_store;
pub mod migrations;

pub use db::Database;
pub use local_store::{keys, LocalStore, MemoryLocalStore, SqliteLocalStore};
