//! Configuration handling for sqlport

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "sqlport.toml";

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// sqlport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SqlportConfig {
    /// Rewrite settings
    #[serde(default)]
    pub rewrite: RewriteConfig,
}

/// Rewrite settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteConfig {
    /// Directory the rewritten files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Inserted between file stem and extension of rewritten files
    #[serde(default = "default_rewritten_suffix")]
    pub rewritten_suffix: String,

    /// Maximum width of change-log summaries
    #[serde(default = "default_summary_width")]
    pub summary_width: usize,

    /// Append the change-log comment block to rewritten files
    #[serde(default = "default_true")]
    pub append_change_log: bool,

    /// Also write the hyperlinked HTML rendering
    #[serde(default = "default_true")]
    pub html: bool,

    /// Worker threads; 0 uses rayon's default
    #[serde(default)]
    pub threads: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("rewritten")
}

fn default_rewritten_suffix() -> String {
    ".rewritten".to_string()
}

fn default_summary_width() -> usize {
    60
}

fn default_true() -> bool {
    true
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            rewritten_suffix: default_rewritten_suffix(),
            summary_width: default_summary_width(),
            append_change_log: true,
            html: true,
            threads: 0,
        }
    }
}

impl SqlportConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the explicit config file if given, else `sqlport.toml` in `dir` if it
    /// exists, else the defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(SqlportConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: SqlportConfig = toml::from_str("").unwrap();
        assert_eq!(config, SqlportConfig::default());
        assert_eq!(config.rewrite.summary_width, 60);
        assert!(config.rewrite.html);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: SqlportConfig = toml::from_str(
            r#"
            [rewrite]
            output_dir = "out"
            html = false
            "#,
        )
        .unwrap();
        assert_eq!(config.rewrite.output_dir, PathBuf::from("out"));
        assert!(!config.rewrite.html);
        assert_eq!(config.rewrite.rewritten_suffix, ".rewritten");
        assert!(config.rewrite.append_change_log);
    }

    #[test]
    fn discover_prefers_explicit_then_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            SqlportConfig::discover(None, dir.path()).unwrap(),
            SqlportConfig::default()
        );

        fs::write(dir.path().join(CONFIG_FILE_NAME), "[rewrite]\nthreads = 3\n").unwrap();
        assert_eq!(SqlportConfig::discover(None, dir.path()).unwrap().rewrite.threads, 3);

        let explicit = dir.path().join("other.toml");
        fs::write(&explicit, "[rewrite]\nsummary_width = 20\n").unwrap();
        let config = SqlportConfig::discover(Some(&explicit), dir.path()).unwrap();
        assert_eq!(config.rewrite.summary_width, 20);
        assert_eq!(config.rewrite.threads, 0);
    }

    #[test]
    fn missing_explicit_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqlportConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[rewrite]\nthreads = \"many\"\n").unwrap();
        assert!(matches!(
            SqlportConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
