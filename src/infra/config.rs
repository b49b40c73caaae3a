use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Artifact layout root (repos/, data/, results/, reports/, traces/)
    pub artifacts: ArtifactsConfig,

    /// LLM provider settings
    pub provider: ProviderConfig,

    /// Agent-loop bounds
    pub search: SearchConfig,

    /// Benchmark execution settings
    pub runner: RunnerConfig,

    /// Ground-truth derivation settings
    pub dataset: DatasetConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig
{
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig
{
    /// Provider label recorded in run metadata
    pub name: String,

    /// Model identifier sent with each request
    pub model: String,

    /// OpenAI-compatible API base, e.g. https://api.openai.com/v1
    pub endpoint: String,

    /// Environment variable holding the API key (never the key itself)
    pub api_key_env: String,

    pub temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig
{
    pub max_turns: u32,
    pub turn_timeout_s: u64,
    pub total_timeout_s: u64,

    /// Message-count threshold before history truncation
    pub history_limit: usize,

    /// Run the dual-channel (lexical + semantic) variant
    pub dual_channel: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig
{
    pub workers: usize,

    /// β for Fβ scores
    pub beta: f64,

    /// File-level weight in the joint Fβ
    pub file_weight: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig
{
    /// Ground-truth languages (python, rust)
    pub languages: Vec<String>,

    /// Clone URL prefix
    pub remote_base: String,

    pub target_range_gap: u32,
    pub max_target_ranges_per_function: usize,
    pub max_gt_blocks: usize,

    /// Call-graph depth for soft-context proposals (0 disables)
    pub soft_context_depth: usize,
}

impl Default for ArtifactsConfig
{
    fn default() -> Self
    {
        Self { root: "artifacts".to_string() }
    }
}

impl Default for ProviderConfig
{
    fn default() -> Self
    {
        Self {
            name: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
        }
    }
}

impl Default for SearchConfig
{
    fn default() -> Self
    {
        Self {
            max_turns: 12,
            turn_timeout_s: 120,
            total_timeout_s: 600,
            history_limit: 40,
            dual_channel: false,
        }
    }
}

impl Default for RunnerConfig
{
    fn default() -> Self
    {
        Self { workers: 4, beta: 0.5, file_weight: 0.5 }
    }
}

impl Default for DatasetConfig
{
    fn default() -> Self
    {
        Self {
            languages: vec!["python".to_string()],
            remote_base: "https://github.com/".to_string(),
            target_range_gap: 3,
            max_target_ranges_per_function: 2,
            max_gt_blocks: 10,
            soft_context_depth: 1,
        }
    }
}

impl Config
{
    /// Artifacts root with `~` and env vars expanded.
    pub fn artifacts_root(&self) -> PathBuf
    {
        let expanded = shellexpand::full(&self.artifacts.root)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| {
                self.artifacts
                    .root
                    .clone()
            });
        PathBuf::from(expanded)
    }

    pub fn build_limits(&self) -> crate::core::gtbuild::BuildLimits
    {
        crate::core::gtbuild::BuildLimits {
            target_range_gap: self
                .dataset
                .target_range_gap,
            max_target_ranges_per_function: self
                .dataset
                .max_target_ranges_per_function,
            max_gt_blocks: self
                .dataset
                .max_gt_blocks,
        }
    }
}

pub fn load_config() -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    let config_paths = ["locbench.toml", "locbench.yaml", "locbench.json", ".locbench.toml"];

    for path in &config_paths
    {
        if Path::new(path).exists()
        {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // Add environment variables with LOCBENCH_ prefix
    // (LOCBENCH_SEARCH__MAX_TURNS=20 overrides [search] max_turns)
    builder =
        builder.add_source(config::Environment::with_prefix("LOCBENCH").separator("__"));

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;

    // Every field is serde-defaulted, so a missing file or a partial one
    // both resolve against the defaults
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("locbench.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
