//! Multi-file rewriting: job loading, the worker pool, and output writing.
//!
//! Every file is rewritten by its own [`RewriteSession`] on a rayon pool. A file
//! either gets all of its outputs or none: outputs go to temporaries in the
//! output directory and are persisted only after the rewrite succeeded.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RewriteConfig;
use crate::directive::{RawDirective, RewriteDirective};
use crate::error::RewriteError;
use crate::render::render_html;
use crate::session::{RewriteOutcome, RewriteSession, SessionOptions};
use crate::subrange::{RawSubrangeTable, SubrangeTable};

// ============================================================================
// Job Files
// ============================================================================

/// Errors loading job files.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid job file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid directive in {}: {source}", path.display())]
    Directive {
        path: PathBuf,
        #[source]
        source: RewriteError,
    },
}

/// A job file as the analyzer writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub files: Vec<JobEntry>,
}

/// One source file of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    /// Source path; relative paths resolve against the job file's directory.
    pub source: PathBuf,
    #[serde(default)]
    pub directives: Vec<RawDirective>,
    #[serde(default)]
    pub subranges: RawSubrangeTable,
}

/// A source file with its parsed directives, ready to rewrite.
#[derive(Debug, Clone)]
pub struct FileJob {
    /// Job file the entry came from.
    pub job: PathBuf,
    pub source: PathBuf,
    pub directives: Vec<RewriteDirective>,
    pub subranges: SubrangeTable,
}

impl FileJob {
    fn from_entry(job: &Path, entry: JobEntry) -> Result<Self, JobError> {
        let base = job.parent().unwrap_or(Path::new(""));
        let source = if entry.source.is_absolute() {
            entry.source
        } else {
            base.join(entry.source)
        };
        let directive_error = |source: RewriteError| JobError::Directive {
            path: job.to_path_buf(),
            source,
        };

        let directives = entry
            .directives
            .into_iter()
            .map(RewriteDirective::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(directive_error)?;
        let subranges = SubrangeTable::from_raw(entry.subranges).map_err(|(block, reason)| {
            // Report the failure against the directive that uses the block.
            let directive = directives
                .iter()
                .find(|d| d.block_id().map(|b| b.0) == Some(block))
                .map(|d| d.id)
                .unwrap_or(0);
            directive_error(RewriteError::invalid_directive(directive, reason))
        })?;

        Ok(FileJob {
            job: job.to_path_buf(),
            source,
            directives,
            subranges,
        })
    }
}

/// Parse one job file.
pub fn load_job_file(path: &Path) -> Result<Vec<FileJob>, JobError> {
    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            JobError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            JobError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let job: JobFile = serde_json::from_str(&content).map_err(|source| JobError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    job.files
        .into_iter()
        .map(|entry| FileJob::from_entry(path, entry))
        .collect()
}

/// Load every job under `paths`.
///
/// A directory contributes each `*.json` file beneath it, in path order. The
/// first malformed job fails the whole load.
pub fn load_jobs(paths: &[PathBuf]) -> Result<Vec<FileJob>, JobError> {
    let mut jobs = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            found.sort();
            debug!(dir = %path.display(), count = found.len(), "found job files");
            for file in found {
                jobs.extend(load_job_file(&file)?);
            }
        } else if path.exists() {
            jobs.extend(load_job_file(path)?);
        } else {
            return Err(JobError::NotFound { path: path.clone() });
        }
    }
    Ok(jobs)
}

// ============================================================================
// Rewriting
// ============================================================================

/// Settings of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub rewritten_suffix: String,
    pub html: bool,
    /// Worker threads; 0 uses rayon's default.
    pub threads: usize,
    pub session: SessionOptions,
}

impl From<&RewriteConfig> for BatchOptions {
    fn from(config: &RewriteConfig) -> Self {
        BatchOptions {
            output_dir: config.output_dir.clone(),
            rewritten_suffix: config.rewritten_suffix.clone(),
            html: config.html,
            threads: config.threads,
            session: SessionOptions {
                summary_width: config.summary_width,
                append_change_log: config.append_change_log,
            },
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions::from(&RewriteConfig::default())
    }
}

impl BatchOptions {
    /// `<output_dir>/<stem><suffix>.<ext>` for a source file.
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match source.extension() {
            Some(ext) => format!("{}{}.{}", stem, self.rewritten_suffix, ext.to_string_lossy()),
            None => format!("{}{}", stem, self.rewritten_suffix),
        };
        self.output_dir.join(name)
    }

    /// `<output_dir>/<stem><suffix>.html` for a source file.
    pub fn html_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_dir
            .join(format!("{}{}.html", stem, self.rewritten_suffix))
    }
}

/// Outputs of a successfully rewritten file.
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub output: PathBuf,
    pub html: Option<PathBuf>,
    pub outcome: RewriteOutcome,
}

/// What happened to one file of a batch.
#[derive(Debug)]
pub struct FileReport {
    pub source: PathBuf,
    pub result: Result<WrittenFile, RewriteError>,
}

impl FileReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Rewrite every job on a worker pool. Reports come back in job order.
pub fn rewrite_all(
    jobs: Vec<FileJob>,
    options: &BatchOptions,
) -> Result<Vec<FileReport>, rayon::ThreadPoolBuildError> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    // Two sources with the same stem would race for the same outputs. The
    // HTML name drops the extension, so it is claimed separately.
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let collisions: Vec<Option<(PathBuf, PathBuf)>> = jobs
        .iter()
        .map(|job| {
            let mut paths = vec![options.output_path(&job.source)];
            if options.html {
                paths.push(options.html_path(&job.source));
            }
            if let Some((path, first)) = paths
                .iter()
                .find_map(|p| claimed.get(p).map(|first| (p.clone(), first.clone())))
            {
                return Some((path, first));
            }
            for path in paths {
                claimed.insert(path, job.source.clone());
            }
            None
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .build()?;
    info!(files = jobs.len(), threads = pool.current_num_threads(), "rewriting batch");

    let reports: Vec<FileReport> = pool.install(|| {
        jobs.into_par_iter()
            .zip(collisions)
            .map(|(job, collision)| {
                let source = job.source.clone();
                let result = match collision {
                    Some((path, first)) => Err(RewriteError::io(
                        path,
                        io::Error::other(format!(
                            "output path already used by {}",
                            first.display()
                        )),
                    )),
                    None => rewrite_one(job, options),
                };
                FileReport { source, result }
            })
            .collect()
    });

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    info!(files = reports.len(), failed, "batch finished");
    Ok(reports)
}

/// Rewrite one file and persist its outputs.
///
/// On failure any outputs an earlier run left for this source are removed, so
/// an aborted file never has outputs on disk.
pub fn rewrite_one(job: FileJob, options: &BatchOptions) -> Result<WrittenFile, RewriteError> {
    let output = options.output_path(&job.source);
    let html_path = options.html.then(|| options.html_path(&job.source));
    let source = job.source.clone();

    match write_outputs(job, options, &output, html_path.as_deref()) {
        Ok(outcome) => {
            info!(
                source = %source.display(),
                output = %output.display(),
                applied = outcome.applied(),
                "wrote rewritten file"
            );
            Ok(WrittenFile {
                output,
                html: html_path,
                outcome,
            })
        }
        Err(err) => {
            remove_stale(&output);
            remove_stale(&options.html_path(&source));
            Err(err)
        }
    }
}

fn write_outputs(
    job: FileJob,
    options: &BatchOptions,
    output: &Path,
    html_path: Option<&Path>,
) -> Result<RewriteOutcome, RewriteError> {
    let mut session = RewriteSession::open(
        &job.source,
        job.directives,
        job.subranges,
        options.session.clone(),
    )?;
    let outcome = session.run()?;

    let html = html_path.map(|_| {
        render_html(
            &job.source.display().to_string(),
            &outcome.text,
            &outcome.entries,
        )
    });

    fs::create_dir_all(&options.output_dir).map_err(|e| RewriteError::io(&options.output_dir, e))?;
    let plain_tmp = stage(&options.output_dir, &outcome.text)?;
    let html_tmp = match &html {
        Some(html) => Some(stage(&options.output_dir, html)?),
        None => None,
    };

    plain_tmp
        .persist(output)
        .map_err(|e| RewriteError::io(output, e.error))?;
    if let (Some(tmp), Some(path)) = (html_tmp, html_path) {
        tmp.persist(path).map_err(|e| RewriteError::io(path, e.error))?;
    }
    Ok(outcome)
}

/// Remove an output left by an earlier run, if there is one.
fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale output"),
    }
}

/// Write `content` to a temporary file in `dir`; dropped unless persisted.
fn stage(dir: &Path, content: &str) -> Result<NamedTempFile, RewriteError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RewriteError::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(|e| RewriteError::io(tmp.path(), e))?;
    Ok(tmp)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_job(dir: &Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, json).unwrap();
        path
    }

    mod load_tests {
        use super::*;

        #[test]
        fn relative_sources_resolve_against_job_directory() {
            let dir = tempfile::tempdir().unwrap();
            let job = write_job(
                dir.path(),
                "job.json",
                r#"{ "files": [ { "source": "sql/a.sql" } ] }"#,
            );
            let jobs = load_jobs(&[job]).unwrap();
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].source, dir.path().join("sql/a.sql"));
            assert!(jobs[0].directives.is_empty());
        }

        #[test]
        fn directory_loads_json_files_in_path_order() {
            let dir = tempfile::tempdir().unwrap();
            write_job(dir.path(), "b.json", r#"{ "files": [ { "source": "b.sql" } ] }"#);
            write_job(dir.path(), "a.json", r#"{ "files": [ { "source": "a.sql" } ] }"#);
            write_job(dir.path(), "notes.txt", "not a job");
            let jobs = load_jobs(&[dir.path().to_path_buf()]).unwrap();
            let names: Vec<_> = jobs
                .iter()
                .map(|j| j.source.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec!["a.sql", "b.sql"]);
        }

        #[test]
        fn unknown_kind_fails_the_load() {
            let dir = tempfile::tempdir().unwrap();
            let job = write_job(
                dir.path(),
                "job.json",
                r#"{ "files": [ { "source": "a.sql", "directives": [
                    { "id": 1, "start_pos": 0, "end_pos": 1, "start_line": 1, "start_col": 0,
                      "end_line": 1, "end_col": 1, "kind": "magic", "payload": { "template": "x" } }
                ] } ] }"#,
            );
            match load_jobs(&[job]) {
                Err(JobError::Directive {
                    source: RewriteError::UnknownRewriteKind(kind),
                    ..
                }) => assert_eq!(kind, "magic"),
                other => panic!("expected unknown kind, got {:?}", other),
            }
        }

        #[test]
        fn missing_and_malformed_jobs_are_reported() {
            let dir = tempfile::tempdir().unwrap();
            assert!(matches!(
                load_jobs(&[dir.path().join("none.json")]),
                Err(JobError::NotFound { .. })
            ));
            let bad = write_job(dir.path(), "bad.json", "{ \"files\": 3 }");
            assert!(matches!(load_jobs(&[bad]), Err(JobError::Json { .. })));
        }
    }

    mod output_tests {
        use super::*;
        use crate::directive::test_support::directive_for;
        use crate::directive::{Payload, RewriteKind};

        fn plain_job(dir: &Path, name: &str, directives: Vec<RewriteDirective>) -> FileJob {
            FileJob {
                job: dir.join("job.json"),
                source: dir.join(name),
                directives,
                subranges: SubrangeTable::new(),
            }
        }

        #[test]
        fn output_names_keep_stem_and_extension() {
            let options = BatchOptions {
                output_dir: PathBuf::from("out"),
                ..BatchOptions::default()
            };
            assert_eq!(
                options.output_path(Path::new("sql/proc.sql")),
                PathBuf::from("out/proc.rewritten.sql")
            );
            assert_eq!(
                options.html_path(Path::new("sql/proc.sql")),
                PathBuf::from("out/proc.rewritten.html")
            );
            assert_eq!(
                options.output_path(Path::new("Makefile")),
                PathBuf::from("out/Makefile.rewritten")
            );
        }

        #[test]
        fn colliding_outputs_fail_the_later_file() {
            let dir = tempfile::tempdir().unwrap();
            for sub in ["a", "b"] {
                fs::create_dir_all(dir.path().join(sub)).unwrap();
                fs::write(dir.path().join(sub).join("p.sql"), "SELECT 1\n").unwrap();
            }
            let jobs = ["a", "b"]
                .iter()
                .map(|sub| FileJob {
                    job: dir.path().join("job.json"),
                    source: dir.path().join(sub).join("p.sql"),
                    directives: vec![],
                    subranges: SubrangeTable::new(),
                })
                .collect();
            let options = BatchOptions {
                output_dir: dir.path().join("out"),
                ..BatchOptions::default()
            };
            let reports = rewrite_all(jobs, &options).unwrap();
            assert!(reports[0].succeeded());
            assert!(matches!(reports[1].result, Err(RewriteError::Io { .. })));
        }

        #[test]
        fn shared_html_name_fails_the_later_file() {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("p.sql"), "AAA\n").unwrap();
            fs::write(dir.path().join("p.txt"), "BBB\n").unwrap();
            let jobs = ["p.sql", "p.txt"]
                .iter()
                .map(|name| plain_job(dir.path(), name, vec![]))
                .collect();
            let options = BatchOptions {
                output_dir: dir.path().join("out"),
                ..BatchOptions::default()
            };
            let reports = rewrite_all(jobs, &options).unwrap();
            assert!(reports[0].succeeded());
            match &reports[1].result {
                Err(RewriteError::Io { path, .. }) => assert_eq!(path, &options.html_path(Path::new("p.txt"))),
                other => panic!("expected an output clash, got {:?}", other),
            }
            let html = fs::read_to_string(options.html_path(Path::new("p.sql"))).unwrap();
            assert!(html.contains("AAA"));
            assert!(!dir.path().join("out/p.rewritten.txt").exists());

            // Without HTML the plain outputs do not clash.
            let jobs = ["p.sql", "p.txt"]
                .iter()
                .map(|name| plain_job(dir.path(), name, vec![]))
                .collect();
            let options = BatchOptions {
                output_dir: dir.path().join("plain"),
                html: false,
                ..BatchOptions::default()
            };
            let reports = rewrite_all(jobs, &options).unwrap();
            assert!(reports.iter().all(FileReport::succeeded));
        }

        #[test]
        fn failed_rerun_removes_earlier_outputs() {
            let dir = tempfile::tempdir().unwrap();
            let text = "SELECT a FROM t\n";
            fs::write(dir.path().join("q.sql"), text).unwrap();
            let options = BatchOptions {
                output_dir: dir.path().join("out"),
                ..BatchOptions::default()
            };

            let written = rewrite_one(plain_job(dir.path(), "q.sql", vec![]), &options).unwrap();
            assert!(written.output.exists());
            assert!(written.html.as_ref().is_some_and(|p| p.exists()));

            // A bare identifier is not a call, so the strip-call wrap aborts.
            let directive = directive_for(
                text,
                1,
                "a",
                RewriteKind::ExprWrapStripCall,
                Payload::Template("ABS({})".to_string()),
            );
            let err = rewrite_one(plain_job(dir.path(), "q.sql", vec![directive]), &options).unwrap_err();
            assert!(matches!(err, RewriteError::BookkeepingInconsistency { .. }));
            assert!(!options.output_path(Path::new("q.sql")).exists());
            assert!(!options.html_path(Path::new("q.sql")).exists());
        }
    }
}
