use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use snapshot_core::{ReconcileOptions, ReconcilePolicy};

const CONFIG_FILE_NAME: &str = "snapshotd.toml";
const CONFIG_ENV: &str = "SNAPSHOTD_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Work tree to run history commands in; defaults to the destination's directory.
    #[serde(default)]
    pub repo_dir: Option<PathBuf>,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_true")]
    pub push: bool,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyConfig {
    #[default]
    StopOnFailure,
    BestEffort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_log_backups")]
    pub backups: usize,
}

/// An application process started and watched alongside the scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub restart_on_exit: bool,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub no_history: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_dir: None,
            program: default_program(),
            remote: None,
            branch: None,
            message: None,
            push: true,
            policy: PolicyConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            max_bytes: default_log_max_bytes(),
            backups: default_log_backups(),
        }
    }
}

impl Config {
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            source,
            destination,
            interval_secs: default_interval_secs(),
            poll_secs: default_poll_secs(),
            history: HistoryConfig::default(),
            log: LogConfig::default(),
            servers: Vec::new(),
        }
    }

    /// Parse `text`, resolving relative paths against `base_dir`.
    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(text).context("Failed to parse config")?;
        config.resolve_paths(base_dir);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(source) = overrides.source {
            self.source = source;
        }
        if let Some(destination) = overrides.destination {
            self.destination = destination;
        }
        if let Some(interval) = overrides.interval_secs {
            self.interval_secs = interval;
        }
        if overrides.no_history {
            self.history.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("interval_secs must be greater than zero");
        }
        if self.poll_secs == 0 {
            bail!("poll_secs must be greater than zero");
        }
        if self.destination.file_name().is_none() {
            bail!("destination must name a file: {}", self.destination.display());
        }
        if self.source == self.destination {
            bail!(
                "source and destination must differ: {}",
                self.source.display()
            );
        }
        if self.log.max_bytes == 0 {
            bail!("log.max_bytes must be greater than zero");
        }

        let mut names = BTreeSet::new();
        for server in &self.servers {
            if server.command.first().is_none_or(|program| program.trim().is_empty()) {
                bail!("server '{}' has an empty command", server.name);
            }
            if !names.insert(server.name.as_str()) {
                bail!("server name '{}' is used more than once", server.name);
            }
        }
        Ok(())
    }

    pub fn history_repo_dir(&self) -> PathBuf {
        if let Some(dir) = &self.history.repo_dir {
            return dir.clone();
        }
        match self.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        let message = self
            .history
            .message
            .clone()
            .unwrap_or_else(|| ReconcileOptions::default_message(&self.destination));
        ReconcileOptions {
            message,
            publish: self.history.push,
            policy: match self.history.policy {
                PolicyConfig::StopOnFailure => ReconcilePolicy::StopOnFailure,
                PolicyConfig::BestEffort => ReconcilePolicy::BestEffort,
            },
        }
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        self.source = absolutize(base_dir, &self.source);
        self.destination = absolutize(base_dir, &self.destination);
        self.log.path = absolutize(base_dir, &self.log.path);
        if let Some(dir) = self.history.repo_dir.take() {
            self.history.repo_dir = Some(absolutize(base_dir, &dir));
        }
        for server in &mut self.servers {
            if let Some(dir) = server.working_dir.take() {
                server.working_dir = Some(absolutize(base_dir, &dir));
            }
        }
    }
}

/// Locate, load and validate the configuration.
///
/// Without a config file, `--source` and `--destination` alone are enough to
/// run with defaults.
pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let path = config_path(explicit);
    let mut config = if path.is_file() {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(|parent| parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf()))
            .unwrap_or_default();
        Config::from_toml(&text, &base_dir)
            .with_context(|| format!("Invalid config file {}", path.display()))?
    } else if explicit.is_some() {
        bail!("config file not found: {}", path.display());
    } else {
        match (&overrides.source, &overrides.destination) {
            (Some(source), Some(destination)) => Config::new(source.clone(), destination.clone()),
            _ => bail!(
                "no config file at {} (pass --config, or both --source and --destination)",
                path.display()
            ),
        }
    };

    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = normalize_optional(std::env::var(CONFIG_ENV).ok()) {
        return PathBuf::from(path);
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("snapshotd").join(CONFIG_FILE_NAME),
        None => local,
    }
}

fn absolutize(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base_dir.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn default_interval_secs() -> u64 {
    1800
}

fn default_poll_secs() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_program() -> String {
    "git".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("snapshotd.log")
}

fn default_log_max_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_log_backups() -> usize {
    3
}

fn default_restart_delay_secs() -> u64 {
    5
}
