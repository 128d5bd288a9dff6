//! Shared configuration, error and domain types for the WGPT chat client.

pub mod config;
pub mod error;
pub mod types;

pub use config::WgptConfig;
pub use error::{Result, WgptError};
pub use types::*;
