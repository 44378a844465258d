use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub poll: PollConfig,
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_retry_failed_generation")]
    pub retry_failed_generation: bool,
    #[serde(default = "default_max_visited_builds")]
    pub max_visited_builds: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            source_timeout_secs: default_source_timeout_secs(),
            retry_failed_generation: default_retry_failed_generation(),
            max_visited_builds: default_max_visited_builds(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}
fn default_source_timeout_secs() -> u64 {
    300
}
fn default_retry_failed_generation() -> bool {
    true
}
fn default_max_visited_builds() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Names of the environment variables holding provider tokens.
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    #[serde(default = "default_azure_devops_token_env")]
    pub azure_devops_token_env: String,
    #[serde(default = "default_github_token_env")]
    pub github_token_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            azure_devops_token_env: default_azure_devops_token_env(),
            github_token_env: default_github_token_env(),
        }
    }
}

fn default_azure_devops_token_env() -> String {
    "AZDO_TOKEN".to_string()
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl CredentialsConfig {
    /// Azure DevOps personal access token, if the variable is set and non-empty.
    pub fn azure_devops_token(&self) -> Option<String> {
        read_token(&self.azure_devops_token_env)
    }

    pub fn github_token(&self) -> Option<String> {
        read_token(&self.github_token_env)
    }
}

fn read_token(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// One configured source. The `kind` tag selects the adapter.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKindConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceKindConfig {
    Filesystem {
        path: PathBuf,
    },
    Pipeline {
        organization: String,
        project: String,
        definition: i64,
        artifact_name: String,
        file_name: String,
    },
    Workflow {
        owner: String,
        repo: String,
        workflow_file_name: String,
        artifact_name: String,
        file_name: String,
    },
}

impl SourceKindConfig {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKindConfig::Filesystem { .. } => "filesystem",
            SourceKindConfig::Pipeline { .. } => "pipeline",
            SourceKindConfig::Workflow { .. } => "workflow",
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.poll.interval_secs == 0 {
        bail!("poll.interval_secs must be > 0");
    }
    if config.poll.source_timeout_secs == 0 {
        bail!("poll.source_timeout_secs must be > 0");
    }
    if config.poll.max_visited_builds < 2 {
        bail!("poll.max_visited_builds must be >= 2");
    }
    if config.generator.command.trim().is_empty() {
        bail!("generator.command must not be empty");
    }

    let mut seen = HashSet::new();
    for source in &config.sources {
        validate_source_name(&source.name)?;
        if !seen.insert(source.name.as_str()) {
            bail!("Duplicate source name: '{}'", source.name);
        }
        if let SourceKindConfig::Filesystem { path } = &source.kind {
            if path.as_os_str().is_empty() {
                bail!("sources.{}: path must not be empty", source.name);
            }
        }
    }

    Ok(config)
}

/// Source names become a directory under `<root>/source` and a URL prefix,
/// so they must be a single safe path segment.
fn validate_source_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Source name must not be empty");
    }
    if name == "." || name == ".." {
        bail!("Invalid source name: '{}'", name);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        bail!(
            "Invalid source name: '{}' (character '{}' not allowed; use A-Z a-z 0-9 . _ -)",
            name,
            c
        );
    }
    Ok(())
}
