//! OpLog Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, identifier types, and
//! configuration structures used across all OpLog components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AllocatorConfig, QueueConfig, ReaderConfig, WriterConfig};
pub use error::{Error, Result};
pub use types::HolderId;
