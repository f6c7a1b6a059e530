//! Configuration management.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML config file,
//! then `LUMEN_*` environment variables. The file is looked up at
//! `--config`, `LUMEN_CONFIG_PATH`, the platform config dir, and finally
//! `~/.config/lumen/config.toml`.

use crate::models::RepoTarget;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "lumen";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_PUSH_DEBOUNCE_MS: u64 = 1500;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 30_000;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "LUMEN_CONFIG_PATH";

/// Main configuration for lumen.
#[derive(Debug, Clone)]
pub struct LumenConfig {
    /// Repository holding the notebook; sync is disabled when unset.
    pub repository: Option<RepoTarget>,
    /// Local git repository the git gateway commits to.
    pub remote_path: PathBuf,
    /// Limit for a single gateway call.
    pub remote_timeout: Duration,
    /// Quiet interval after the last edit before pushing.
    pub push_debounce: Duration,
    /// Pull when the coordinator starts.
    pub pull_on_start: bool,
    /// Local cache file.
    pub cache_path: PathBuf,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Logging section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// Level or `EnvFilter` directive, e.g. `info` or `lumen=debug`.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Repository section.
    pub repository: Option<ConfigFileRepository>,
    /// Remote section.
    pub remote: Option<ConfigFileRemote>,
    /// Sync section.
    pub sync: Option<ConfigFileSync>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// `[repository]` section.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRepository {
    /// Owner.
    pub owner: Option<String>,
    /// Name.
    pub name: Option<String>,
    /// Branch.
    pub branch: Option<String>,
}

/// `[remote]` section.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRemote {
    /// Git repository path.
    pub path: Option<String>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// `[sync]` section.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSync {
    /// Push debounce in milliseconds.
    pub push_debounce_ms: Option<u64>,
    /// Pull on start.
    pub pull_on_start: Option<bool>,
}

/// `[cache]` section.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Cache file path.
    pub path: Option<String>,
}

fn data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".lumen"),
        |dirs| dirs.data_local_dir().join(APP_DIR),
    )
}

impl Default for LumenConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            repository: None,
            remote_path: data.join("notes.git"),
            remote_timeout: Duration::from_millis(DEFAULT_REMOTE_TIMEOUT_MS),
            push_debounce: Duration::from_millis(DEFAULT_PUSH_DEBOUNCE_MS),
            pull_on_start: true,
            cache_path: data.join("cache.json"),
            logging: LoggingSettings::default(),
        }
    }
}

impl LumenConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration the way the CLI does: explicit path, then
    /// `LUMEN_CONFIG_PATH`, then the default locations, then env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be loaded or an
    /// environment override is malformed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::load_default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::parse(&contents)
    }

    /// Parses TOML config contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn parse(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/lumen/`. Returns the
    /// default configuration if neither holds a readable file.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join(APP_DIR).join(CONFIG_FILE),
            base_dirs
                .home_dir()
                .join(".config")
                .join(APP_DIR)
                .join(CONFIG_FILE),
        ];
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping config file"),
            }
        }

        Self::default()
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(repository) = file.repository {
            match (repository.owner, repository.name) {
                (Some(owner), Some(name)) => {
                    let mut target = RepoTarget::parse(&format!("{owner}/{name}"))?;
                    if let Some(branch) = repository.branch {
                        target = target.with_branch(branch);
                    }
                    config.repository = Some(target);
                },
                (None, None) => {},
                _ => {
                    return Err(Error::InvalidInput(
                        "[repository] needs both owner and name".to_string(),
                    ));
                },
            }
        }
        if let Some(remote) = file.remote {
            if let Some(path) = remote.path {
                config.remote_path = PathBuf::from(path);
            }
            if let Some(ms) = remote.timeout_ms {
                config.remote_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(sync) = file.sync {
            if let Some(ms) = sync.push_debounce_ms {
                config.push_debounce = Duration::from_millis(ms);
            }
            if let Some(pull) = sync.pull_on_start {
                config.pull_on_start = pull;
            }
        }
        if let Some(cache) = file.cache.and_then(|c| c.path) {
            config.cache_path = PathBuf::from(cache);
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        Ok(config)
    }

    /// Applies `LUMEN_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed values.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(repository) = lookup("LUMEN_REPOSITORY") {
            let branch = self.repository.as_ref().map(|r| r.branch.clone());
            let mut target = RepoTarget::parse(&repository)?;
            if let Some(branch) = branch {
                target = target.with_branch(branch);
            }
            self.repository = Some(target);
        }
        if let Some(path) = lookup("LUMEN_REMOTE_PATH") {
            self.remote_path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("LUMEN_PUSH_DEBOUNCE_MS") {
            let ms = ms.trim().parse::<u64>().map_err(|e| {
                Error::InvalidInput(format!("LUMEN_PUSH_DEBOUNCE_MS '{ms}': {e}"))
            })?;
            self.push_debounce = Duration::from_millis(ms);
        }
        if let Some(format) = lookup("LUMEN_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        Ok(self)
    }

    /// Sets the repository.
    #[must_use]
    pub fn with_repository(mut self, repository: Option<RepoTarget>) -> Self {
        self.repository = repository;
        self
    }

    /// Sets the git repository path.
    #[must_use]
    pub fn with_remote_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.remote_path = path.into();
        self
    }

    /// Sets the cache path.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }
}
