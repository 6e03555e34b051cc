//! Gatewarden common types, names, and errors.
//!
//! This crate provides foundational types shared by the update and recovery
//! crates:
//! - The subsystem-wide error taxonomy (integrity, I/O, network,
//!   concurrency, budget) with stable codes
//! - Backup and run identifiers
//! - Output format specifications for the CLI

pub mod error;
pub mod id;
pub mod output;

pub use error::{
    format_error_human, Error, ErrorCategory, Result, StructuredError, SuggestedAction,
};
pub use id::{timestamped_name, BackupId, RunId};
pub use output::OutputFormat;

/// Schema version stamped on every JSON payload the CLI prints.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Version reported when the install tree carries no version marker.
pub const DEFAULT_SOFTWARE_VERSION: &str = "1.0.0";
