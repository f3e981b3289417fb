//! sqlport - rewrites SQL scripts from analyzer-supplied rewrite directives.
//!
//! This crate provides the CLI binary. The rewriting itself lives in
//! `sqlport-core`.
//!
//! ## Modules
//!
//! - `cli` - CLI command implementations

pub mod cli;

// Re-export core types for convenience
pub use sqlport_core::error::{OutputErrorCode, SqlportError};
pub use sqlport_core::output::{ErrorInfo, ErrorResponse, PlanResponse, RewriteResponse, SCHEMA_VERSION};
