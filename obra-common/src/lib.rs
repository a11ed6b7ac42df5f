//! # Obra Common Library
//!
//! Shared code for the Obra public-works services including:
//! - Error type and result alias
//! - Bootstrap configuration loading (TOML + environment)
//! - Event types (ObraEvent enum) and the broadcast EventBus
//! - SQLite pool initialization and settings helpers
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
