//! Shared types, error model, and configuration for atomdoc.
//!
//! This crate is the foundation depended on by all other atomdoc crates.
//! It provides:
//! - [`AtomdocError`] — the unified error type
//! - Domain types ([`AtomContent`], [`NodeId`], [`Job`], statuses and warnings)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AtomizerConfig, DefaultsConfig, ProviderConfig, ProviderVendor, Task,
    TaskOverrides, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_keys,
};
pub use error::{AtomdocError, Result};
pub use types::{
    AtomContent, AtomType, AtomizationStatus, CURRENT_SCHEMA_VERSION, CancelSignal,
    ContentCategory, Job, JobId, JobSnapshot, JobStage, NodeId, NodeKind, PageText, StatusCounts,
    Warning, WarningKind,
};
