//! JSON output types and serialization for CLI responses.
//!
//! ## Design Principles
//!
//! 1. **Status first:** Every response has `status` as first field
//! 2. **Deterministic:** Files appear in job order, change-log entries in application order
//! 3. **Nullable vs absent:** Explicit `null` for "no value"; absent field means "not applicable"
//! 4. **Versioned:** Schema version in response enables forward compatibility

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::batch::{FileJob, FileReport};
use crate::changelog::RewriteLogEntry;
use crate::error::{OutputErrorCode, RewriteError, SqlportError};
use crate::schedule;

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Error Types
// ============================================================================

/// Error information for error responses and aborted files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Numeric error code.
    pub code: u8,
    /// Error class, e.g. `OverlapConflict`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Error-specific structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    /// Create from a per-file rewrite error.
    pub fn from_rewrite_error(err: &RewriteError) -> Self {
        let code = if err.aborts_run() {
            OutputErrorCode::InternalError
        } else {
            OutputErrorCode::RewriteFailed
        };
        let details = match err {
            RewriteError::OverlapConflict { first, second } => {
                Some(serde_json::json!({ "first": first, "second": second }))
            }
            RewriteError::BookkeepingInconsistency { directive, .. }
            | RewriteError::InvalidDirective { directive, .. } => {
                Some(serde_json::json!({ "directive": directive }))
            }
            RewriteError::Io { path, .. } => Some(serde_json::json!({ "path": path })),
            RewriteError::UnknownRewriteKind(kind) => Some(serde_json::json!({ "kind": kind })),
        };
        ErrorInfo {
            code: code.code(),
            kind: Some(err.kind_name().to_string()),
            message: err.to_string(),
            details,
        }
    }

    /// Create from a SqlportError.
    pub fn from_error(err: &SqlportError) -> Self {
        match err {
            SqlportError::Rewrite { file, source } => {
                let mut info = ErrorInfo::from_rewrite_error(source);
                info.code = err.error_code().code();
                info.message = err.to_string();
                if let Some(serde_json::Value::Object(map)) = info.details.as_mut() {
                    map.insert("file".to_string(), serde_json::json!(file));
                }
                info
            }
            _ => ErrorInfo {
                code: err.error_code().code(),
                kind: None,
                message: err.to_string(),
                details: None,
            },
        }
    }
}

/// Response for a failed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Error information.
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Create an error response from a SqlportError.
    pub fn from_error(err: &SqlportError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Rewrite Response
// ============================================================================

/// Outcome of one file of a rewrite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub source: PathBuf,
    /// "ok" or "aborted".
    pub status: String,
    /// Rewritten file (absent when aborted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Hyperlinked rendering (absent when aborted or disabled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<PathBuf>,
    pub applied: u32,
    /// Directive ids per iteration, in application order.
    pub iterations: Vec<Vec<u32>>,
    pub change_log: Vec<RewriteLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl From<&FileReport> for FileResult {
    fn from(report: &FileReport) -> Self {
        match &report.result {
            Ok(written) => FileResult {
                source: report.source.clone(),
                status: "ok".to_string(),
                output: Some(written.output.clone()),
                html: written.html.clone(),
                applied: written.outcome.applied() as u32,
                iterations: written.outcome.iterations.clone(),
                change_log: written.outcome.entries.clone(),
                source_sha256: Some(written.outcome.source_sha256.clone()),
                error: None,
            },
            Err(err) => FileResult {
                source: report.source.clone(),
                status: "aborted".to_string(),
                output: None,
                html: None,
                applied: 0,
                iterations: Vec::new(),
                change_log: Vec::new(),
                source_sha256: None,
                error: Some(ErrorInfo::from_rewrite_error(err)),
            },
        }
    }
}

/// Totals of a rewrite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteSummary {
    pub files: u32,
    pub succeeded: u32,
    pub aborted: u32,
    /// Applied directives over all succeeded files.
    pub applied: u32,
}

/// Response for `sqlport rewrite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteResponse {
    /// Status: "ok" when every file succeeded, else "partial".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// When the run finished (ISO 8601, UTC).
    pub generated_at: String,
    pub files: Vec<FileResult>,
    pub summary: RewriteSummary,
}

impl RewriteResponse {
    /// Build the response for a finished batch.
    pub fn new(reports: &[FileReport]) -> Self {
        let files: Vec<FileResult> = reports.iter().map(FileResult::from).collect();
        let succeeded = files.iter().filter(|f| f.error.is_none()).count() as u32;
        let summary = RewriteSummary {
            files: files.len() as u32,
            succeeded,
            aborted: files.len() as u32 - succeeded,
            applied: files.iter().map(|f| f.applied).sum(),
        };
        RewriteResponse {
            status: if summary.aborted == 0 { "ok" } else { "partial" }.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: format_timestamp(SystemTime::now()),
            files,
            summary,
        }
    }

    /// Whether any file aborted.
    pub fn has_failures(&self) -> bool {
        self.summary.aborted > 0
    }
}

// ============================================================================
// Plan Response
// ============================================================================

/// Schedule of one file, or why it cannot be scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePlan {
    pub source: PathBuf,
    /// "ok" or "conflict".
    pub status: String,
    pub directives: u32,
    pub iterations: Vec<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl FilePlan {
    /// Schedule a job's directives without touching any file.
    pub fn for_job(job: &FileJob) -> Self {
        let directives = job.directives.len() as u32;
        match schedule::plan(&job.directives) {
            Ok(plan) => FilePlan {
                source: job.source.clone(),
                status: "ok".to_string(),
                directives,
                iterations: plan.ids(&job.directives),
                error: None,
            },
            Err(err) => FilePlan {
                source: job.source.clone(),
                status: "conflict".to_string(),
                directives,
                iterations: Vec::new(),
                error: Some(ErrorInfo::from_rewrite_error(&err)),
            },
        }
    }
}

/// Response for `sqlport plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Status: "ok" when every file can be scheduled, else "partial".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    pub files: Vec<FilePlan>,
}

impl PlanResponse {
    pub fn new(files: Vec<FilePlan>) -> Self {
        let clean = files.iter().all(|f| f.error.is_none());
        PlanResponse {
            status: if clean { "ok" } else { "partial" }.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            files,
        }
    }
}

// ============================================================================
// Response Emission
// ============================================================================

/// Format a timestamp for JSON output (ISO 8601).
fn format_timestamp(time: SystemTime) -> String {
    use chrono::{DateTime, Utc};

    let datetime: DateTime<Utc> = time.into();
    datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Emit a response as pretty-printed JSON to a writer.
///
/// This is the single output path for CLI, ensuring consistency.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================
