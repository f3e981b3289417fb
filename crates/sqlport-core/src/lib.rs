//! Core infrastructure for sqlport.
//!
//! This crate applies analyzer-produced rewrite directives to SQL source files:
//! - Directives, subranges and their serialized job-file form
//! - Directive scheduling into nesting-ordered iterations
//! - The offset ledger that remaps original coordinates into later snapshots
//! - Statement recipes that produce replacement text
//! - The per-file rewrite driver, change log and HTML rendering
//! - Multi-file batches, configuration and JSON output types

pub mod batch;
pub mod changelog;
pub mod config;
pub mod directive;
pub mod error;
pub mod ledger;
pub mod output;
pub mod recipes;
pub mod render;
pub mod schedule;
pub mod session;
pub mod subrange;
pub mod text;

pub use directive::{BlockId, BlockRecipe, Payload, RewriteDirective, RewriteKind, Span};
pub use error::{OutputErrorCode, RewriteError, RewriteResult, SqlportError};
pub use session::{RewriteOutcome, RewriteSession, SessionOptions};
pub use text::Position;
