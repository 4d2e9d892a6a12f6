//! Configuration for the DirGen client.
//!
//! Settings live in `.dirgen/dirgen.toml`. When a project has none, the
//! user-level file in the platform config directory is used instead. Values
//! are layered file → environment → CLI flags.
//!
//! ```toml
//! [orchestrator]
//! base_url = "http://127.0.0.1:8000"
//! # ws_url = "ws://127.0.0.1:8000"
//! request_timeout_secs = 120
//! approval_timeout_secs = 30
//! connect_timeout_secs = 10
//!
//! [client]
//! auto_approve = false
//! activity_limit = 500
//!
//! [logging]
//! level = "info"
//! file = true
//! ```

use anyhow::{Context, Result, anyhow};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::activity::DEFAULT_ACTIVITY_LIMIT;
use crate::connection::ws_base_from_http;

pub const CONFIG_DIR: &str = ".dirgen";
pub const CONFIG_FILE: &str = "dirgen.toml";

pub const ENV_HOST: &str = "DIRGEN_HOST";
pub const ENV_WS_URL: &str = "DIRGEN_WS_URL";
pub const ENV_LOG: &str = "DIRGEN_LOG";

/// Orchestrator endpoints and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Stream root; derived from `base_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_approval_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: None,
            request_timeout_secs: default_request_timeout(),
            approval_timeout_secs: default_approval_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Approve every gate without prompting.
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_activity_limit")]
    pub activity_limit: usize,
}

fn default_activity_limit() -> usize {
    DEFAULT_ACTIVITY_LIMIT
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            auto_approve: false,
            activity_limit: default_activity_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter directive used when `DIRGEN_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write logs to `.dirgen/logs/`.
    #[serde(default = "default_log_file")]
    pub file: bool,
    /// Write the log file as JSON lines instead of plain text.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> bool {
    true
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            json: false,
        }
    }
}

/// The complete dirgen.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirgenToml {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DirgenToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse dirgen.toml")
    }

    /// Project file, then the user-level file, then defaults.
    pub fn load_or_default(dirgen_dir: &Path) -> Result<Self> {
        let project = dirgen_dir.join(CONFIG_FILE);
        if project.exists() {
            return Self::load(&project);
        }
        match user_config_path() {
            Some(user) if user.exists() => Self::load(&user),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize dirgen.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let orch = &self.orchestrator;

        match Url::parse(&orch.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => warnings.push(format!(
                "base_url '{}' should use http or https, not '{}'",
                orch.base_url,
                url.scheme()
            )),
            Err(e) => warnings.push(format!("Invalid base_url '{}': {}", orch.base_url, e)),
        }

        if let Some(ws) = &orch.ws_url {
            match Url::parse(ws) {
                Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
                Ok(url) => warnings.push(format!(
                    "ws_url '{}' should use ws or wss, not '{}'",
                    ws,
                    url.scheme()
                )),
                Err(e) => warnings.push(format!("Invalid ws_url '{}': {}", ws, e)),
            }
        }

        for (name, value) in [
            ("request_timeout_secs", orch.request_timeout_secs),
            ("approval_timeout_secs", orch.approval_timeout_secs),
            ("connect_timeout_secs", orch.connect_timeout_secs),
        ] {
            if value == 0 {
                warnings.push(format!("{} is 0; every call would time out immediately", name));
            }
        }

        if self.client.activity_limit == 0 {
            warnings.push("activity_limit is 0; only the latest entry will be kept".to_string());
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging level '{}'", self.logging.level));
        }

        warnings
    }
}

/// `<config dir>/dirgen/dirgen.toml`, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dirgen").join(CONFIG_FILE))
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct DirgenConfig {
    pub project_dir: PathBuf,
    pub dirgen_dir: PathBuf,
    pub toml: DirgenToml,
    pub verbose: bool,
    pub yes: bool,
}

impl DirgenConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let dirgen_dir = project_dir.join(CONFIG_DIR);
        let toml = DirgenToml::load_or_default(&dirgen_dir)?;
        Ok(Self {
            project_dir,
            dirgen_dir,
            toml,
            verbose: false,
            yes: false,
        })
    }

    /// Load, then apply the process environment and CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        host: Option<String>,
        verbose: bool,
        yes: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.apply_env(|key| std::env::var(key).ok());
        if let Some(host) = host {
            config.toml.orchestrator.base_url = host;
        }
        config.verbose = verbose;
        config.yes = yes;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_HOST).filter(|v| !v.is_empty()) {
            self.toml.orchestrator.base_url = host;
        }
        if let Some(ws) = lookup(ENV_WS_URL).filter(|v| !v.is_empty()) {
            self.toml.orchestrator.ws_url = Some(ws);
        }
    }

    pub fn base_url(&self) -> Result<Url> {
        let raw = &self.toml.orchestrator.base_url;
        Url::parse(raw).with_context(|| format!("Invalid orchestrator URL '{}'", raw))
    }

    /// Stream root: explicit `ws_url`, else `base_url` with a ws scheme.
    pub fn ws_url(&self) -> Result<Url> {
        match &self.toml.orchestrator.ws_url {
            Some(raw) => Url::parse(raw).with_context(|| format!("Invalid stream URL '{}'", raw)),
            None => Ok(ws_base_from_http(&self.base_url()?)?),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.request_timeout_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.approval_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.connect_timeout_secs)
    }

    /// CLI `--yes` or the file setting.
    pub fn auto_approve(&self) -> bool {
        self.yes || self.toml.client.auto_approve
    }

    pub fn activity_limit(&self) -> usize {
        self.toml.client.activity_limit
    }

    /// Default filter directive; `--verbose` raises it to debug.
    pub fn log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.toml.logging.level.clone()
        }
    }

    pub fn log_to_file(&self) -> bool {
        self.toml.logging.file
    }

    pub fn log_json(&self) -> bool {
        self.toml.logging.json
    }

    pub fn config_path(&self) -> PathBuf {
        self.dirgen_dir.join(CONFIG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dirgen_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Find the document to submit: `.dirgen/svad.md` first, then the most
    /// recently modified `docs/*svad*.md`.
    pub fn find_document(&self) -> Result<PathBuf> {
        find_document(&self.project_dir)
    }
}

pub fn find_document(project_dir: &Path) -> Result<PathBuf> {
    let preferred = project_dir.join(CONFIG_DIR).join("svad.md");
    if preferred.exists() {
        return Ok(preferred);
    }

    let pattern = project_dir
        .join("docs/*svad*.md")
        .to_string_lossy()
        .to_string();
    let mut candidates: Vec<PathBuf> = glob(&pattern)
        .context("Failed to read glob pattern")?
        .filter_map(|entry| entry.ok())
        .collect();

    if candidates.is_empty() {
        return Err(anyhow!(
            "No document found. Create .dirgen/svad.md or pass a DOCUMENT path"
        ));
    }

    candidates.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });
    Ok(candidates.remove(0))
}
