//! Configuration for reviewflow.
//!
//! Settings are read from `.reviewflow/reviewflow.toml` and layered
//! file → environment → CLI, so a flag beats an environment variable which
//! beats the file. Every section is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = ".reviewflow/data"
//!
//! [session]
//! app_name = "reviewflow"
//! default_owner = "local"
//! seed_file = "seed_state.json"
//!
//! [pipeline]
//! pacing_ms = 1000
//! worker_timeout_secs = 300
//! failure_policy = "continue_on_error"
//!
//! [cache]
//! enabled = true
//! ttl_secs = 86400
//!
//! [classifier]
//! command = "my-classifier"
//!
//! [synthesizer]
//! command = "my-synthesizer"
//! args = ["--format", "markdown"]
//!
//! [workers.security]
//! command = "security-scan"
//! keywords = ["security", "vulnerability", "injection"]
//!
//! [workers.carbon]
//! enabled = false
//! ```
//!
//! # Environment
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `REVIEWFLOW_DATA_DIR` | `storage.data_dir` |
//! | `REVIEWFLOW_APP_NAME` | `session.app_name` |
//! | `REVIEWFLOW_PACING_MS` | `pipeline.pacing_ms` |
//! | `REVIEWFLOW_CACHE_TTL_SECS` | `cache.ttl_secs` |

use crate::cache::DEFAULT_TTL_SECS;
use crate::orchestrator::{CommandSpec, ExecutorSettings, FailurePolicy};
use crate::review::WorkerKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_DIR: &str = ".reviewflow";
pub const CONFIG_FILE: &str = "reviewflow.toml";

pub const ENV_DATA_DIR: &str = "REVIEWFLOW_DATA_DIR";
pub const ENV_APP_NAME: &str = "REVIEWFLOW_APP_NAME";
pub const ENV_PACING_MS: &str = "REVIEWFLOW_PACING_MS";
pub const ENV_CACHE_TTL_SECS: &str = "REVIEWFLOW_CACHE_TTL_SECS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Root for sessions, artifacts and cache; relative paths are resolved
    /// against the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_owner")]
    pub default_owner: String,
    /// JSON object new sessions start from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,
}

fn default_app_name() -> String {
    "reviewflow".to_string()
}

fn default_owner() -> String {
    "local".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            default_owner: default_owner(),
            seed_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_worker_timeout_secs() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    64
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            worker_timeout_secs: default_worker_timeout_secs(),
            failure_policy: FailurePolicy::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

/// An external command backing the classifier or the synthesizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CommandSection {
    pub fn to_command_spec(&self) -> Option<CommandSpec> {
        let program = self.command.as_ref()?;
        Some(CommandSpec {
            program: program.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            working_dir: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub command: CommandSection,
    /// Replaces the built-in routing keywords when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            command: CommandSection::default(),
            keywords: Vec::new(),
        }
    }
}

/// The `.reviewflow/reviewflow.toml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewflowToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub classifier: CommandSection,
    #[serde(default)]
    pub synthesizer: CommandSection,
    /// Keyed by domain (`quality`, `security`, `practices`, `carbon`).
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerSection>,
}

impl ReviewflowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse reviewflow.toml")
    }

    /// Load `<config_dir>/reviewflow.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize reviewflow.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Worker kinds to register, in registration order.
    pub fn enabled_workers(&self) -> Vec<WorkerKind> {
        WorkerKind::all()
            .into_iter()
            .filter(|kind| {
                self.workers
                    .get(kind.domain())
                    .is_none_or(|section| section.enabled)
            })
            .collect()
    }

    /// Keyword overrides for the router.
    pub fn worker_keywords(&self) -> HashMap<WorkerKind, Vec<String>> {
        self.workers
            .iter()
            .filter(|(_, section)| !section.keywords.is_empty())
            .filter_map(|(domain, section)| {
                WorkerKind::from_domain(domain).map(|kind| (kind, section.keywords.clone()))
            })
            .collect()
    }

    pub fn worker_command(&self, kind: WorkerKind) -> Option<CommandSpec> {
        self.workers
            .get(kind.domain())
            .and_then(|section| section.command.to_command_spec())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (domain, section) in &self.workers {
            match WorkerKind::from_str(domain) {
                Err(_) => warnings.push(format!("Unknown worker section [workers.{}]", domain)),
                Ok(kind) if kind.domain() != domain => warnings.push(format!(
                    "Worker section [workers.{}] should be named [workers.{}]",
                    domain,
                    kind.domain()
                )),
                Ok(_) => {}
            }
            if section.enabled && section.command.command.is_none() {
                warnings.push(format!("Worker '{}' is enabled but has no command", domain));
            }
        }
        if self.enabled_workers().is_empty() {
            warnings.push("All workers are disabled; every analysis will be empty".to_string());
        }
        if self.classifier.command.is_none() {
            warnings.push("No classifier command configured".to_string());
        }
        if self.synthesizer.command.is_none() {
            warnings.push(
                "No synthesizer command configured; reports will be rendered locally".to_string(),
            );
        }
        if self.pipeline.worker_timeout_secs == 0 {
            warnings
                .push("pipeline.worker_timeout_secs is 0; every call will time out".to_string());
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            warnings.push("cache.ttl_secs is 0; cached results expire immediately".to_string());
        }
        if self.session.app_name.trim().is_empty() {
            warnings.push("session.app_name is empty".to_string());
        }

        warnings
    }
}

/// Values that can be set from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub data_dir: Option<PathBuf>,
    pub app_name: Option<String>,
    pub pacing_ms: Option<u64>,
    pub failure_policy: Option<FailurePolicy>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ReviewflowConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: ReviewflowToml,
    env_data_dir: Option<PathBuf>,
    env_app_name: Option<String>,
    env_pacing_ms: Option<u64>,
    env_cache_ttl_secs: Option<u64>,
    env_warnings: Vec<String>,
    cli: CliOverrides,
}

impl ReviewflowConfig {
    /// Load the file layer for a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = ReviewflowToml::load_or_default(&config_dir)?;
        Ok(Self::from_parts(project_dir, toml))
    }

    pub fn from_parts(project_dir: PathBuf, toml: ReviewflowToml) -> Self {
        Self {
            config_dir: project_dir.join(CONFIG_DIR),
            project_dir,
            toml,
            env_data_dir: None,
            env_app_name: None,
            env_pacing_ms: None,
            env_cache_ttl_secs: None,
            env_warnings: Vec::new(),
            cli: CliOverrides::default(),
        }
    }

    /// Load file, environment and CLI layers.
    pub fn load(project_dir: PathBuf, cli: CliOverrides) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.apply_env_overrides();
        config.cli = cli;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply the environment layer using `lookup` to read variables.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        self.env_data_dir = non_empty(ENV_DATA_DIR).map(PathBuf::from);
        self.env_app_name = non_empty(ENV_APP_NAME);
        self.env_pacing_ms = self.parse_env_number(ENV_PACING_MS, non_empty(ENV_PACING_MS));
        self.env_cache_ttl_secs =
            self.parse_env_number(ENV_CACHE_TTL_SECS, non_empty(ENV_CACHE_TTL_SECS));
    }

    fn parse_env_number(&mut self, key: &str, raw: Option<String>) -> Option<u64> {
        let raw = raw?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.env_warnings
                    .push(format!("Ignoring {}='{}': not a whole number", key, raw));
                None
            }
        }
    }

    pub fn with_cli_overrides(mut self, cli: CliOverrides) -> Self {
        self.cli = cli;
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Data root (CLI → env → file → `.reviewflow/data`).
    pub fn data_dir(&self) -> PathBuf {
        self.cli
            .data_dir
            .as_ref()
            .or(self.env_data_dir.as_ref())
            .or(self.toml.storage.data_dir.as_ref())
            .map(|p| self.resolve(p))
            .unwrap_or_else(|| self.config_dir.join("data"))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir().join("sessions")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir().join("artifacts")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn seed_file(&self) -> Option<PathBuf> {
        self.toml.session.seed_file.as_ref().map(|p| self.resolve(p))
    }

    /// Application name (CLI → env → file).
    pub fn app_name(&self) -> String {
        self.cli
            .app_name
            .clone()
            .or_else(|| self.env_app_name.clone())
            .unwrap_or_else(|| self.toml.session.app_name.clone())
    }

    pub fn default_owner(&self) -> &str {
        &self.toml.session.default_owner
    }

    /// Pacing interval (CLI → env → file).
    pub fn pacing(&self) -> Duration {
        let ms = self
            .cli
            .pacing_ms
            .or(self.env_pacing_ms)
            .unwrap_or(self.toml.pipeline.pacing_ms);
        Duration::from_millis(ms)
    }

    /// Cache TTL (env → file).
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.env_cache_ttl_secs.unwrap_or(self.toml.cache.ttl_secs))
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.cli
            .failure_policy
            .unwrap_or(self.toml.pipeline.failure_policy)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            pacing: self.pacing(),
            worker_timeout: Duration::from_secs(self.toml.pipeline.worker_timeout_secs),
            failure_policy: self.failure_policy(),
            event_buffer: self.toml.pipeline.event_buffer,
        }
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        if let Some(seed) = self.seed_file()
            && !seed.exists()
        {
            warnings.push(format!(
                "Seed file {} does not exist; sessions will start from the default state",
                seed.display()
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_empty() {
        let toml = ReviewflowToml::parse("").unwrap();
        assert_eq!(toml, ReviewflowToml::default());
        assert_eq!(toml.session.app_name, "reviewflow");
        assert_eq!(toml.pipeline.pacing_ms, 1000);
        assert_eq!(toml.cache.ttl_secs, DEFAULT_TTL_SECS);
        assert_eq!(toml.enabled_workers(), WorkerKind::all().to_vec());
    }

    #[test]
    fn test_parse_full() {
        let toml = ReviewflowToml::parse(
            r#"
[session]
app_name = "code_review"

[pipeline]
pacing_ms = 250
failure_policy = "abort_on_error"

[cache]
ttl_secs = 60

[classifier]
command = "classify"
args = ["--json"]

[workers.security]
command = "scan"
keywords = ["injection"]

[workers.carbon]
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(toml.session.app_name, "code_review");
        assert_eq!(toml.pipeline.failure_policy, FailurePolicy::AbortOnError);
        assert_eq!(
            toml.classifier.to_command_spec(),
            Some(CommandSpec::new("classify").arg("--json"))
        );
        assert_eq!(
            toml.worker_command(WorkerKind::Security),
            Some(CommandSpec::new("scan"))
        );
        assert_eq!(
            toml.enabled_workers(),
            vec![WorkerKind::Quality, WorkerKind::Security, WorkerKind::Practices]
        );
        assert_eq!(
            toml.worker_keywords().get(&WorkerKind::Security),
            Some(&vec!["injection".to_string()])
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ReviewflowToml::parse("[pipeline]\npacing_ms = \"fast\"").is_err());
        assert!(ReviewflowToml::parse("[pipeline]\nfailure_policy = \"retry\"").is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let toml = ReviewflowToml::parse(
            r#"
[workers.styling]
command = "x"

[workers.quality]

[cache]
ttl_secs = 0
"#,
        )
        .unwrap();
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("Unknown worker section [workers.styling]")));
        assert!(warnings.iter().any(|w| w.contains("'quality' is enabled but has no command")));
        assert!(warnings.iter().any(|w| w.contains("ttl_secs is 0")));
        assert!(warnings.iter().any(|w| w.contains("No classifier command")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut toml = ReviewflowToml::default();
        toml.pipeline.pacing_ms = 5;
        toml.workers.insert(
            "quality".to_string(),
            WorkerSection {
                command: CommandSection {
                    command: Some("lint".to_string()),
                    ..CommandSection::default()
                },
                ..WorkerSection::default()
            },
        );
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        toml.save(&path).unwrap();

        let loaded = ReviewflowToml::load_or_default(&dir.path().join(CONFIG_DIR)).unwrap();
        assert_eq!(loaded, toml);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let loaded = ReviewflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, ReviewflowToml::default());
    }

    #[test]
    fn test_default_paths() {
        let dir = tempdir().unwrap();
        let config = ReviewflowConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.data_dir(), root.join(".reviewflow/data"));
        assert_eq!(config.sessions_dir(), root.join(".reviewflow/data/sessions"));
        assert_eq!(config.cache_dir(), root.join(".reviewflow/data/cache"));
        assert_eq!(config.log_dir(), root.join(".reviewflow/logs"));
    }

    #[test]
    fn test_layering_file_env_cli() {
        let dir = tempdir().unwrap();
        let mut toml = ReviewflowToml::default();
        toml.pipeline.pacing_ms = 100;
        toml.storage.data_dir = Some(PathBuf::from("from-file"));
        toml.session.app_name = "file-app".to_string();
        let mut config = ReviewflowConfig::from_parts(dir.path().to_path_buf(), toml);

        assert_eq!(config.pacing(), Duration::from_millis(100));
        assert_eq!(config.data_dir(), dir.path().join("from-file"));

        config.apply_env_overrides_from(env(&[
            (ENV_PACING_MS, "200"),
            (ENV_DATA_DIR, "/tmp/from-env"),
            (ENV_APP_NAME, "env-app"),
            (ENV_CACHE_TTL_SECS, "30"),
        ]));
        assert_eq!(config.pacing(), Duration::from_millis(200));
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/from-env"));
        assert_eq!(config.app_name(), "env-app");
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));

        let config = config.with_cli_overrides(CliOverrides {
            pacing_ms: Some(0),
            app_name: Some("cli-app".to_string()),
            failure_policy: Some(FailurePolicy::AbortOnError),
            ..CliOverrides::default()
        });
        assert_eq!(config.pacing(), Duration::ZERO);
        assert_eq!(config.app_name(), "cli-app");
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/from-env"));
        assert_eq!(
            config.executor_settings().failure_policy,
            FailurePolicy::AbortOnError
        );
    }

    #[test]
    fn test_invalid_env_number_is_a_warning() {
        let dir = tempdir().unwrap();
        let mut config =
            ReviewflowConfig::from_parts(dir.path().to_path_buf(), ReviewflowToml::default());
        config.apply_env_overrides_from(env(&[(ENV_PACING_MS, "soon")]));
        assert_eq!(config.pacing(), Duration::from_millis(1000));
        assert!(
            config
                .validate()
                .iter()
                .any(|w| w.contains("REVIEWFLOW_PACING_MS"))
        );
    }

    #[test]
    fn test_missing_seed_file_warns() {
        let dir = tempdir().unwrap();
        let mut toml = ReviewflowToml::default();
        toml.session.seed_file = Some(PathBuf::from("seed.json"));
        let config = ReviewflowConfig::from_parts(dir.path().to_path_buf(), toml);
        assert_eq!(config.seed_file(), Some(dir.path().join("seed.json")));
        assert!(config.validate().iter().any(|w| w.contains("Seed file")));
    }
}
