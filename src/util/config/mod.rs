//! Host configuration
//!
//! One TOML file describes a deployment: the tier, the module manifest, the
//! prelude, the compiler entry and the host/scheduler names.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. --config <file>
//! 3. User-level (~/.config/atmos-host/config.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use atmos_host::util::config::HostConfig;
//!
//! let config: HostConfig = toml::from_str("[tick]\nperiod_ms = 20").unwrap();
//! let plan = config.plan().unwrap();
//! assert_eq!(plan.period.as_millis(), 20);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bootstrap::{BootPlan, CompilerEntry, PreludeRequire, Tier, DEFAULT_COMPLETION_FLAG};
use crate::engine::{HostBindings, SchedulerNames};
use crate::module::{bundled, ModuleSpec};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("module `{name}`: {reason}")]
    InvalidModule { name: String, reason: String },

    #[error("compiled tier needs a [compiler] section")]
    MissingCompiler,

    #[error("tick period must be positive")]
    InvalidPeriod,

    #[error("Cannot determine config directory")]
    NoConfigDir,
}

/// Whole host configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub bindings: BindingsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Requires run after registration; defaults to the bundled scheduler
    #[serde(default)]
    pub prelude: Option<Vec<PreludeConfig>>,
    /// Module manifest, registered in order after the bundled scheduler
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub compiler: Option<CompilerConfig>,
}

/// `[run]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub tier: Tier,
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_completion_flag")]
    pub completion_flag: String,
    /// Register the crate's own scheduler module
    #[serde(default = "default_true")]
    pub bundled_scheduler: bool,
}

fn default_source_name() -> String {
    "input.lua".to_string()
}

fn default_completion_flag() -> String {
    DEFAULT_COMPLETION_FLAG.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tier: Tier::default(),
            source_name: default_source_name(),
            completion_flag: default_completion_flag(),
            bundled_scheduler: true,
        }
    }
}

/// `[tick]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

fn default_period_ms() -> u64 {
    16
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { period_ms: 16 }
    }
}

/// `[remote]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            branch: default_branch(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// `base_url/repo/branch/path`
    pub fn url_for(
        &self,
        repo: &str,
        branch: Option<&str>,
        path: &str,
    ) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            repo.trim_matches('/'),
            branch.unwrap_or(&self.branch),
            path.trim_start_matches('/')
        )
    }
}

/// `[bindings]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingsConfig {
    #[serde(default = "default_now")]
    pub now: String,
    #[serde(default = "default_close")]
    pub close: String,
}

fn default_now() -> String {
    HostBindings::default().now
}

fn default_close() -> String {
    HostBindings::default().close
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            now: default_now(),
            close: default_close(),
        }
    }
}

/// `[scheduler]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_emit")]
    pub emit: String,
    #[serde(default = "default_stop")]
    pub stop: String,
    #[serde(default = "default_clock_event")]
    pub clock_event: String,
}

fn default_start() -> String {
    "start".to_string()
}

fn default_emit() -> String {
    "emit".to_string()
}

fn default_stop() -> String {
    "stop".to_string()
}

fn default_clock_event() -> String {
    "clock".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            emit: default_emit(),
            stop: default_stop(),
            clock_event: default_clock_event(),
        }
    }
}

/// One `[[prelude]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreludeConfig {
    pub module: String,
    #[serde(default)]
    pub global: Option<String>,
}

/// One `[[modules]]` entry; exactly one source key must be set
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub bundled: bool,
}

impl ModuleConfig {
    fn spec(
        &self,
        remote: &RemoteConfig,
        base_dir: Option<&Path>,
    ) -> Result<ModuleSpec, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidModule {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }

        let sources = [
            self.url.is_some(),
            self.repo.is_some(),
            self.source.is_some(),
            self.file.is_some(),
            self.bundled,
        ];
        match sources.iter().filter(|set| **set).count() {
            0 => return Err(invalid("no source given (url, repo, source, file or bundled)")),
            1 => {}
            _ => return Err(invalid("more than one source given")),
        }

        if let Some(url) = &self.url {
            return Ok(ModuleSpec::remote(&self.name, url));
        }
        if let Some(repo) = &self.repo {
            let path = self.path.as_deref().ok_or_else(|| invalid("`repo` needs a `path`"))?;
            let url = remote.url_for(repo, self.branch.as_deref(), path);
            return Ok(ModuleSpec::remote(&self.name, url));
        }
        if let Some(source) = &self.source {
            return Ok(ModuleSpec::inline(&self.name, source));
        }
        if let Some(file) = &self.file {
            let path = match base_dir {
                Some(dir) if file.is_relative() => dir.join(file),
                _ => file.clone(),
            };
            return Ok(ModuleSpec::file(&self.name, path));
        }
        if bundled::source(&self.name).is_none() {
            return Err(invalid(&format!(
                "no bundled module with this name (bundled: {})",
                bundled::names().join(", ")
            )));
        }
        Ok(ModuleSpec::bundled(&self.name))
    }
}

/// `[compiler]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default)]
    pub module: Option<String>,
    pub function: String,
    #[serde(default)]
    pub wrap: Option<String>,
}

impl HostConfig {
    /// Parse a config file; relative module files resolve against its directory.
    pub fn load(path: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok((config, path.parent().map(Path::to_path_buf)))
    }

    /// Build the run plan.
    pub fn plan(&self) -> Result<BootPlan, ConfigError> {
        self.plan_relative_to(None)
    }

    /// Build the run plan, resolving relative module files against `base_dir`.
    pub fn plan_relative_to(
        &self,
        base_dir: Option<&Path>,
    ) -> Result<BootPlan, ConfigError> {
        if self.tick.period_ms == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        let tier = self.run.tier;

        let mut modules = Vec::new();
        let scheduler_bundled = self.run.bundled_scheduler && tier != Tier::Bare;
        if scheduler_bundled {
            modules.push(ModuleSpec::bundled(bundled::SCHEDULER));
        }
        for module in &self.modules {
            modules.push(module.spec(&self.remote, base_dir)?);
        }

        let prelude = match &self.prelude {
            Some(entries) => entries
                .iter()
                .map(|entry| PreludeRequire {
                    module: entry.module.clone(),
                    global: entry.global.clone(),
                })
                .collect(),
            None if scheduler_bundled => vec![PreludeRequire::new(bundled::SCHEDULER)],
            None => Vec::new(),
        };

        let compiler = self.compiler.as_ref().map(|c| CompilerEntry {
            module: c.module.clone(),
            function: c.function.clone(),
            wrap: c.wrap.clone(),
        });
        if tier == Tier::Compiled && compiler.is_none() {
            return Err(ConfigError::MissingCompiler);
        }

        Ok(BootPlan {
            tier,
            source_name: self.run.source_name.clone(),
            completion_flag: self.run.completion_flag.clone(),
            modules,
            prelude,
            compiler,
            bindings: HostBindings {
                now: self.bindings.now.clone(),
                close: self.bindings.close.clone(),
            },
            scheduler: SchedulerNames {
                start: self.scheduler.start.clone(),
                emit: self.scheduler.emit.clone(),
                stop: self.scheduler.stop.clone(),
                clock_event: self.scheduler.clock_event.clone(),
            },
            period: Duration::from_millis(self.tick.period_ms),
            fetch_timeout: Duration::from_secs(self.remote.timeout_secs),
        })
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("atmos-host"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("atmos-host"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("atmos-host"));
    }

    None
}

/// Get the user config file path (~/.config/atmos-host/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load an explicit config file.
pub fn load_config(path: &Path) -> Result<(HostConfig, Option<PathBuf>), ConfigError> {
    HostConfig::load(path)
}

/// Load user-level configuration
/// Returns default config if file doesn't exist
pub fn load_user_config() -> Result<(HostConfig, Option<PathBuf>), ConfigError> {
    let path = match get_config_path() {
        Some(p) => p,
        None => return Ok((HostConfig::default(), None)),
    };

    if !path.exists() {
        return Ok((HostConfig::default(), None));
    }

    HostConfig::load(&path)
}
