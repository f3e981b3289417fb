//! CLI front door.
//!
//! Provides the command implementations behind `main.rs`:
//! - `rewrite` - rewrite every file of the given jobs and write the outputs
//! - `plan` - schedule the directives of the given jobs without writing anything
//!
//! ## Error Handling
//!
//! All functions return `Result<T, SqlportError>`. Failures of individual files
//! are not errors here: they are reported per file inside the response.

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use sqlport_core::batch::{load_jobs, rewrite_all, BatchOptions};
use sqlport_core::config::SqlportConfig;
use sqlport_core::error::SqlportError;
use sqlport_core::output::{FilePlan, PlanResponse, RewriteResponse};

/// Command-line overrides of the `[rewrite]` config section.
#[derive(Debug, Clone, Default)]
pub struct RewriteOverrides {
    pub output_dir: Option<PathBuf>,
    pub threads: Option<usize>,
    pub no_html: bool,
}

/// Load `--config`, else `sqlport.toml` in the working directory, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<SqlportConfig, SqlportError> {
    let cwd = env::current_dir()
        .map_err(|e| SqlportError::internal(format!("cannot read working directory: {}", e)))?;
    let config = SqlportConfig::discover(explicit, &cwd)?;
    debug!(?config, "loaded configuration");
    Ok(config)
}

/// Batch options from the config file with command-line overrides applied.
pub fn batch_options(config: &SqlportConfig, overrides: &RewriteOverrides) -> BatchOptions {
    let mut options = BatchOptions::from(&config.rewrite);
    if let Some(dir) = &overrides.output_dir {
        options.output_dir = dir.clone();
    }
    if let Some(threads) = overrides.threads {
        options.threads = threads;
    }
    if overrides.no_html {
        options.html = false;
    }
    options
}

fn require_jobs(jobs: &[PathBuf]) -> Result<(), SqlportError> {
    if jobs.is_empty() {
        return Err(SqlportError::invalid_args("at least one job file or directory is required"));
    }
    Ok(())
}

/// Rewrite every file of `jobs`.
pub fn run_rewrite(jobs: &[PathBuf], options: &BatchOptions) -> Result<RewriteResponse, SqlportError> {
    require_jobs(jobs)?;
    let files = load_jobs(jobs)?;
    let reports = rewrite_all(files, options)
        .map_err(|e| SqlportError::internal(format!("failed to create thread pool: {}", e)))?;
    Ok(RewriteResponse::new(&reports))
}

/// Schedule every file of `jobs` without rewriting.
pub fn run_plan(jobs: &[PathBuf]) -> Result<PlanResponse, SqlportError> {
    require_jobs(jobs)?;
    let files = load_jobs(jobs)?;
    Ok(PlanResponse::new(files.iter().map(FilePlan::for_job).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_config() {
        let mut config = SqlportConfig::default();
        config.rewrite.threads = 2;
        let overrides = RewriteOverrides {
            output_dir: Some(PathBuf::from("elsewhere")),
            threads: None,
            no_html: true,
        };
        let options = batch_options(&config, &overrides);
        assert_eq!(options.output_dir, PathBuf::from("elsewhere"));
        assert_eq!(options.threads, 2);
        assert!(!options.html);
        assert_eq!(options.session.summary_width, 60);
    }

    #[test]
    fn empty_job_list_is_invalid() {
        let err = run_plan(&[]).unwrap_err();
        assert_eq!(err.error_code().code(), 2);
    }
}
