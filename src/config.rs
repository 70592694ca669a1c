//! Toolkit configuration for labramp.
//!
//! Settings that belong to the machine running the tests rather than to a
//! particular test plan: which `kubectl` to call, how often to poll, where to
//! write results.
//!
//! # Configuration Levels
//!
//! Configurations are loaded from three levels with increasing priority:
//!
//! 1. **User** - `~/.config/labramp/config.toml` (platform config dir)
//! 2. **Project** - `labramp.toml` in the working directory
//! 3. **Explicit** - a file passed with `--config`
//!
//! Missing files are skipped. Tables are deep-merged, so a project file only
//! needs the keys it overrides. CLI flags are applied on top by the binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use labramp::config::ConfigLoader;
//!
//! let (config, sources) = ConfigLoader::new(".").load_with_sources(None)?;
//! for source in sources.iter().filter(|s| s.loaded) {
//!     println!("loaded {} config from {}", source.level, source.path.display());
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{LabError, Result};

/// File name of the project-level configuration.
pub const PROJECT_CONFIG_FILE: &str = "labramp.toml";

/// Resolved toolkit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabConfig {
    /// Path or name of the kubectl binary.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Namespace jobs are created in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Optional kubeconfig context passed as `--context`.
    #[serde(default)]
    pub context: Option<String>,

    /// Seconds between job status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single job's runtime, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Attempts per kubectl call before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Directory run results are written under.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Leave finished jobs in the cluster instead of deleting them.
    #[serde(default)]
    pub keep_jobs: bool,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_job_timeout_secs() -> u64 {
    1800
}

fn default_max_retries() -> u32 {
    3
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            namespace: default_namespace(),
            context: None,
            poll_interval_secs: default_poll_interval_secs(),
            job_timeout_secs: default_job_timeout_secs(),
            max_retries: default_max_retries(),
            results_dir: default_results_dir(),
            keep_jobs: false,
        }
    }
}

impl LabConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LabConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidConfig`] for the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.kubectl.trim().is_empty() {
            return Err(LabError::invalid_config("kubectl", "must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(LabError::invalid_config("namespace", "must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(LabError::invalid_config(
                "poll_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.job_timeout_secs == 0 {
            return Err(LabError::invalid_config(
                "job_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.max_retries == 0 {
            return Err(LabError::invalid_config(
                "max_retries",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LabError::config(e.to_string()))
    }
}

// ============================================================================
// Configuration Level
// ============================================================================

/// Configuration level in the resolution order.
///
/// ```rust
/// use labramp::config::ConfigLevel;
///
/// assert!(ConfigLevel::User < ConfigLevel::Project);
/// assert!(ConfigLevel::Project < ConfigLevel::Explicit);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLevel {
    /// Per-user defaults (lowest priority).
    User,
    /// `labramp.toml` in the working directory.
    Project,
    /// File passed on the command line (highest priority).
    Explicit,
}

impl std::fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// A file considered during resolution.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// The level of this source.
    pub level: ConfigLevel,
    /// Path that was checked.
    pub path: PathBuf,
    /// Whether the file existed and was merged.
    pub loaded: bool,
}

// ============================================================================
// Loader
// ============================================================================

/// Loads and merges configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    user_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader rooted at `project_dir`, using the platform config dir
    /// for the user-level file.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            user_path: dirs::config_dir().map(|d| d.join("labramp").join("config.toml")),
        }
    }

    /// Override the user-level config path (`None` disables it).
    #[must_use]
    pub fn with_user_path(mut self, path: Option<PathBuf>) -> Self {
        self.user_path = path;
        self
    }

    /// Load the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed, if the
    /// explicit file does not exist, or if the merged result is invalid.
    pub fn load(&self, explicit: Option<&Path>) -> Result<LabConfig> {
        self.load_with_sources(explicit).map(|(config, _)| config)
    }

    /// Load the merged configuration and report which files took part.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_with_sources(
        &self,
        explicit: Option<&Path>,
    ) -> Result<(LabConfig, Vec<ConfigSource>)> {
        let mut candidates: Vec<(ConfigLevel, PathBuf)> = Vec::new();
        if let Some(user) = &self.user_path {
            candidates.push((ConfigLevel::User, user.clone()));
        }
        candidates.push((
            ConfigLevel::Project,
            self.project_dir.join(PROJECT_CONFIG_FILE),
        ));
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(LabError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
            candidates.push((ConfigLevel::Explicit, path.to_path_buf()));
        }

        let mut merged = toml::Table::new();
        let mut sources = Vec::with_capacity(candidates.len());

        for (level, path) in candidates {
            let loaded = if path.is_file() {
                let content = std::fs::read_to_string(&path)?;
                let table: toml::Table = toml::from_str(&content).map_err(|e| {
                    LabError::config_with_path(format!("failed to parse: {e}"), path.clone())
                })?;
                debug!("Merging {} config from {}", level, path.display());
                merge_tables(&mut merged, table);
                true
            } else {
                false
            };
            sources.push(ConfigSource {
                level,
                path,
                loaded,
            });
        }

        let config: LabConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| LabError::config(e.to_string()))?;
        config.validate()?;
        Ok((config, sources))
    }
}

/// Deep-merge `overlay` into `base`; overlay values win.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new(dir.path()).with_user_path(None)
    }

    #[test]
    fn test_defaults() {
        let config = LabConfig::default();
        assert_eq!(config.kubectl, "kubectl");
        assert_eq!(config.namespace, "default");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_partial() {
        let config = LabConfig::from_toml_str("namespace = \"perf\"\nkeep_jobs = true").unwrap();
        assert_eq!(config.namespace, "perf");
        assert!(config.keep_jobs);
        assert_eq!(config.job_timeout_secs, 1800);
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let err = LabConfig::from_toml_str("poll_interval_secs = 0").unwrap_err();
        assert!(matches!(err, LabError::InvalidConfig { ref field, .. } if field == "poll_interval_secs"));
    }

    #[test]
    fn test_load_without_files_is_default() {
        let temp = TempDir::new().unwrap();
        let (config, sources) = loader(&temp).load_with_sources(None).unwrap();
        assert_eq!(config, LabConfig::default());
        assert_eq!(sources.len(), 1);
        assert!(!sources[0].loaded);
    }

    #[test]
    fn test_explicit_overrides_project() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(PROJECT_CONFIG_FILE),
            "namespace = \"project-ns\"\nmax_retries = 5\n",
        )
        .unwrap();
        let explicit = temp.path().join("override.toml");
        std::fs::write(&explicit, "namespace = \"explicit-ns\"\n").unwrap();

        let (config, sources) = loader(&temp)
            .load_with_sources(Some(&explicit))
            .unwrap();
        assert_eq!(config.namespace, "explicit-ns");
        assert_eq!(config.max_retries, 5);
        assert!(sources.iter().all(|s| s.loaded));
    }

    #[test]
    fn test_user_level_is_lowest_priority() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user.toml");
        std::fs::write(&user, "namespace = \"user-ns\"\nkubectl = \"/opt/kubectl\"\n").unwrap();
        std::fs::write(
            temp.path().join(PROJECT_CONFIG_FILE),
            "namespace = \"project-ns\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new(temp.path())
            .with_user_path(Some(user))
            .load(None)
            .unwrap();
        assert_eq!(config.namespace, "project-ns");
        assert_eq!(config.kubectl, "/opt/kubectl");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = loader(&temp)
            .load(Some(&temp.path().join("nope.toml")))
            .unwrap_err();
        assert!(matches!(err, LabError::MissingFile { .. }));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(PROJECT_CONFIG_FILE), "namespace = [").unwrap();
        let err = loader(&temp).load(None).unwrap_err();
        assert!(matches!(err, LabError::Config { path: Some(_), .. }));
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = toml::from_str("[a]\nx = 1\ny = 2").unwrap();
        let overlay: toml::Table = toml::from_str("[a]\ny = 3").unwrap();
        merge_tables(&mut base, overlay);
        let a = base["a"].as_table().unwrap();
        assert_eq!(a["x"].as_integer(), Some(1));
        assert_eq!(a["y"].as_integer(), Some(3));
    }

    #[test]
    fn test_round_trip_toml() {
        let config = LabConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(LabConfig::from_toml_str(&text).unwrap(), config);
    }
}
