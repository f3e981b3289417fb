//! Error types and error code constants for sqlport.
//!
//! Two layers:
//! - [`RewriteError`] is the per-file failure taxonomy of the rewriter. Every
//!   variant except [`RewriteError::UnknownRewriteKind`] aborts only the file it
//!   occurred in.
//! - [`SqlportError`] is the unified type the CLI renders as JSON. Domain errors
//!   (rewrite, config, job loading) are bridged into it with `From` impls.
//!
//! ## Error Code Mapping
//!
//! - `2`: Invalid arguments (bad flags, malformed job or config file)
//! - `3`: Resolution errors (job file or source file not found)
//! - `4`: Rewrite failures (at least one file aborted)
//! - `10`: Internal errors (bugs, unknown rewrite kinds)

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::directive::DirectiveRange;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Error codes for JSON output.
///
/// These codes map to CLI exit codes and appear in JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller (bad input, malformed job file).
    InvalidArguments = 2,
    /// Resolution errors (job or source file not found).
    ResolutionError = 3,
    /// One or more files could not be rewritten.
    RewriteFailed = 4,
    /// Internal errors (bugs, unexpected state).
    InternalError = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Rewrite Errors
// ============================================================================

/// Failures of a single file's rewrite run.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// Two directives overlap without one containing the other.
    #[error("directives {first} and {second} overlap without nesting")]
    OverlapConflict {
        first: DirectiveRange,
        second: DirectiveRange,
    },

    /// A remapped coordinate or length disagrees with the snapshot, or a recipe
    /// could not produce a valid replacement.
    #[error("bookkeeping inconsistency at directive {directive}: {reason}")]
    BookkeepingInconsistency { directive: u32, reason: String },

    /// A directive kind the rewriter does not know.
    #[error("unknown rewrite kind '{0}'")]
    UnknownRewriteKind(String),

    /// A directive whose coordinates or payload do not fit the original text.
    #[error("invalid directive {directive}: {reason}")]
    InvalidDirective { directive: u32, reason: String },

    /// Reading the input or writing an output failed.
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RewriteError {
    /// Create a bookkeeping inconsistency error.
    pub fn bookkeeping(directive: u32, reason: impl Into<String>) -> Self {
        RewriteError::BookkeepingInconsistency {
            directive,
            reason: reason.into(),
        }
    }

    /// Create an invalid directive error.
    pub fn invalid_directive(directive: u32, reason: impl Into<String>) -> Self {
        RewriteError::InvalidDirective {
            directive,
            reason: reason.into(),
        }
    }

    /// Create an IO error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RewriteError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the whole run instead of just one file.
    pub fn aborts_run(&self) -> bool {
        matches!(self, RewriteError::UnknownRewriteKind(_))
    }

    /// Stable short name of the variant, used in JSON output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RewriteError::OverlapConflict { .. } => "OverlapConflict",
            RewriteError::BookkeepingInconsistency { .. } => "BookkeepingInconsistency",
            RewriteError::UnknownRewriteKind(_) => "UnknownRewriteKind",
            RewriteError::InvalidDirective { .. } => "InvalidDirective",
            RewriteError::Io { .. } => "Io",
        }
    }
}

/// Result type for rewrite operations.
pub type RewriteResult<T> = Result<T, RewriteError>;

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI output.
#[derive(Debug, Error)]
pub enum SqlportError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// A job, config or source file does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// A job file could not be parsed.
    #[error("invalid job file {path}: {message}")]
    InvalidJob { path: String, message: String },

    /// The config file could not be parsed.
    #[error("invalid config file {path}: {message}")]
    InvalidConfig { path: String, message: String },

    /// Rewriting a file failed.
    #[error("rewrite of {file} failed: {source}")]
    Rewrite {
        file: String,
        #[source]
        source: RewriteError,
    },

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    InternalError { message: String },
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&SqlportError> for OutputErrorCode {
    fn from(err: &SqlportError) -> Self {
        match err {
            SqlportError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            SqlportError::FileNotFound { .. } => OutputErrorCode::ResolutionError,
            SqlportError::InvalidJob { .. } => OutputErrorCode::InvalidArguments,
            SqlportError::InvalidConfig { .. } => OutputErrorCode::InvalidArguments,
            SqlportError::Rewrite { source, .. } if source.aborts_run() => {
                OutputErrorCode::InternalError
            }
            SqlportError::Rewrite { .. } => OutputErrorCode::RewriteFailed,
            SqlportError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<SqlportError> for OutputErrorCode {
    fn from(err: SqlportError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridge: ConfigError -> SqlportError
// ============================================================================

impl From<crate::config::ConfigError> for SqlportError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound { path } => SqlportError::FileNotFound {
                path: path.to_string_lossy().into_owned(),
            },
            ConfigError::Io { path, source } => SqlportError::InternalError {
                message: format!("IO error reading {}: {}", path.display(), source),
            },
            ConfigError::Parse { path, source } => SqlportError::InvalidConfig {
                path: path.to_string_lossy().into_owned(),
                message: source.to_string(),
            },
        }
    }
}

// ============================================================================
// Bridge: JobError -> SqlportError
// ============================================================================

impl From<crate::batch::JobError> for SqlportError {
    fn from(err: crate::batch::JobError) -> Self {
        use crate::batch::JobError;
        match err {
            JobError::NotFound { path } => SqlportError::FileNotFound {
                path: path.to_string_lossy().into_owned(),
            },
            JobError::Io { path, source } => SqlportError::InternalError {
                message: format!("IO error reading {}: {}", path.display(), source),
            },
            JobError::Json { path, source } => SqlportError::InvalidJob {
                path: path.to_string_lossy().into_owned(),
                message: source.to_string(),
            },
            JobError::Directive { path, source } => match source {
                RewriteError::UnknownRewriteKind(_) => SqlportError::Rewrite {
                    file: path.to_string_lossy().into_owned(),
                    source,
                },
                other => SqlportError::InvalidJob {
                    path: path.to_string_lossy().into_owned(),
                    message: other.to_string(),
                },
            },
        }
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl SqlportError {
    /// Create an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        SqlportError::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        SqlportError::FileNotFound { path: path.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        SqlportError::InternalError {
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
