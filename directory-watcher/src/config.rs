//! Configuration types for directory watching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Result, WatcherError};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Environment variable that overrides `processorTarget`.
pub const PROCESSOR_TARGET_ENV: &str = "WATCHDIR_PROCESSOR_TARGET";

const DEFAULT_PROCESS_DELAY: Duration = Duration::from_secs(1);

/// Validated configuration snapshot.
///
/// Instances are immutable once built; a reload produces a whole new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Directory to monitor (non-recursively).
    pub watch_path: PathBuf,

    /// Glob patterns matched against the base name. Empty matches everything.
    pub file_patterns: Vec<String>,

    /// Maximum number of jobs running at once.
    pub concurrency_cap: usize,

    /// Delay applied by the processor for each file.
    pub process_delay: Duration,

    /// Address consumed only by the processor.
    pub processor_target: Option<Url>,
}

impl WatchConfig {
    /// Create a config watching `path` with default settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            watch_path: path.into(),
            file_patterns: Vec::new(),
            concurrency_cap: 1,
            process_delay: DEFAULT_PROCESS_DELAY,
            processor_target: None,
        }
    }

    /// Add a filename pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_patterns.push(pattern.into());
        self
    }

    /// Set the concurrency cap. Zero falls back to one.
    pub fn with_concurrency_cap(mut self, cap: usize) -> Self {
        self.concurrency_cap = cap.max(1);
        self
    }

    /// Set the per-file processing delay.
    pub fn with_process_delay(mut self, delay: Duration) -> Self {
        self.process_delay = delay;
        self
    }

    /// Parse and validate YAML configuration.
    ///
    /// `target_override` takes precedence over the `processorTarget` key.
    pub fn from_yaml(source: &str, target_override: Option<String>) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        let raw: RawConfig = if source.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(source)?
        };
        raw.validate(target_override)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Configuration as written on disk, before defaults and validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default, alias = "watchdir")]
    watch_dir: Option<PathBuf>,

    #[serde(default)]
    file_patterns: Vec<String>,

    #[serde(default, alias = "maxGoroutines")]
    max_concurrency: Option<i64>,

    /// Whole seconds.
    #[serde(default)]
    process_delay: Option<i64>,

    #[serde(default)]
    processor_target: Option<String>,
}

impl RawConfig {
    fn validate(self, target_override: Option<String>) -> Result<WatchConfig> {
        let watch_path = match self.watch_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => PathBuf::from("."),
        };

        let concurrency_cap = match self.max_concurrency {
            Some(n) if n > 0 => usize::try_from(n)
                .map_err(|_| WatcherError::Config(format!("maxConcurrency too large: {n}")))?,
            _ => 1,
        };

        let process_delay = match self.process_delay {
            None => DEFAULT_PROCESS_DELAY,
            Some(secs) if secs < 0 => {
                return Err(WatcherError::Config(format!(
                    "processDelay must not be negative, got {secs}"
                )));
            }
            Some(secs) => Duration::from_secs(secs.unsigned_abs()),
        };

        let processor_target = target_override
            .or(self.processor_target)
            .filter(|t| !t.trim().is_empty())
            .map(|t| parse_target(&t))
            .transpose()?;

        Ok(WatchConfig {
            watch_path,
            file_patterns: self.file_patterns,
            concurrency_cap,
            process_delay,
            processor_target,
        })
    }
}

fn parse_target(target: &str) -> Result<Url> {
    Url::parse(target).map_err(|e| WatcherError::InvalidTarget {
        target: target.to_string(),
        reason: e.to_string(),
    })
}

/// Loads [`WatchConfig`] snapshots from a YAML file on demand.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, parse and validate the configuration file.
    ///
    /// The processor target may be overridden through [`PROCESSOR_TARGET_ENV`].
    pub fn load(&self) -> Result<WatchConfig> {
        let source = std::fs::read_to_string(&self.path)?;
        self.parse(&source)
    }

    /// Like [`ConfigLoader::load`], but an empty file is an error.
    ///
    /// A file caught between truncation and rewrite would otherwise replace
    /// running settings with the defaults.
    pub fn reload(&self) -> Result<WatchConfig> {
        let source = std::fs::read_to_string(&self.path)?;
        if source.trim().is_empty() {
            return Err(WatcherError::Config(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        self.parse(&source)
    }

    fn parse(&self, source: &str) -> Result<WatchConfig> {
        let target_override = std::env::var(PROCESSOR_TARGET_ENV).ok();
        let config = WatchConfig::from_yaml(source, target_override)?;
        debug!("Loaded configuration from {}", self.path.display());
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_test::assert_ok;

    #[test]
    fn test_full_config() {
        let yaml = r#"
watchDir: /srv/incoming
filePatterns: ["*.html", "*.htm"]
maxConcurrency: 4
processDelay: 3
processorTarget: "ws://chrome:9222"
"#;
        let config = WatchConfig::from_yaml(yaml, None).unwrap();

        assert_eq!(config.watch_path, PathBuf::from("/srv/incoming"));
        assert_eq!(config.file_patterns, vec!["*.html", "*.htm"]);
        assert_eq!(config.concurrency_cap, 4);
        assert_eq!(config.process_delay, Duration::from_secs(3));
        assert_eq!(
            config.processor_target.map(|u| u.to_string()),
            Some("ws://chrome:9222/".to_string())
        );
    }

    #[test]
    fn test_legacy_keys() {
        let yaml = "watchdir: ./in\nmaxGoroutines: 2\n";
        let config = WatchConfig::from_yaml(yaml, None).unwrap();

        assert_eq!(config.watch_path, PathBuf::from("./in"));
        assert_eq!(config.concurrency_cap, 2);
    }

    #[test]
    fn test_defaults() {
        let config = WatchConfig::from_yaml("", None).unwrap();

        assert_eq!(config, WatchConfig::default());
        assert_eq!(config.watch_path, PathBuf::from("."));
        assert_eq!(config.concurrency_cap, 1);
        assert_eq!(config.process_delay, Duration::from_secs(1));
        assert!(config.file_patterns.is_empty());
    }

    #[test]
    fn test_non_positive_cap_falls_back_to_one() {
        let zero = WatchConfig::from_yaml("maxConcurrency: 0", None).unwrap();
        let negative = WatchConfig::from_yaml("maxConcurrency: -3", None).unwrap();

        assert_eq!(zero.concurrency_cap, 1);
        assert_eq!(negative.concurrency_cap, 1);
    }

    #[test]
    fn test_zero_delay_is_allowed() {
        let config = WatchConfig::from_yaml("processDelay: 0", None).unwrap();
        assert_eq!(config.process_delay, Duration::ZERO);
    }

    #[test]
    fn test_negative_delay_rejected() {
        let err = WatchConfig::from_yaml("processDelay: -1", None).unwrap_err();
        assert!(err.is_config());
        assert!(matches!(err, WatcherError::Config(_)));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let err = WatchConfig::from_yaml("maxConcurrency: [1, 2", None).unwrap_err();
        assert!(matches!(err, WatcherError::Parse(_)));
        assert!(err.is_config());
    }

    #[test]
    fn test_target_override_and_validation() {
        let yaml = "processorTarget: http://file-target:9222";
        let config =
            WatchConfig::from_yaml(yaml, Some("http://override:9222".to_string())).unwrap();
        assert_eq!(
            config.processor_target.map(|u| u.host_str().map(String::from)),
            Some(Some("override".to_string()))
        );

        let err = WatchConfig::from_yaml("processorTarget: not a url", None).unwrap_err();
        assert!(matches!(err, WatcherError::InvalidTarget { .. }));
    }

    #[test]
    fn test_loader_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "watchDir: /tmp\nfilePatterns: ['*.html']").unwrap();

        let loader = ConfigLoader::new(file.path());
        let config = assert_ok!(loader.load());
        assert_eq!(config.file_patterns, vec!["*.html"]);
    }

    #[test]
    fn test_loader_missing_file() {
        let loader = ConfigLoader::new("/nonexistent/watchdir/config.yaml");
        assert!(matches!(loader.load(), Err(WatcherError::Io(_))));
    }

    #[test]
    fn test_reload_rejects_empty_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  ").unwrap();

        let loader = ConfigLoader::new(file.path());
        assert_ok!(loader.load());
        let err = loader.reload().unwrap_err();
        assert!(err.is_config(), "unexpected error: {err}");
    }
}
