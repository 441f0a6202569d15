/// Configuration module for decomprag.
///
/// Handles loading, validating, and providing default configuration values
/// for a decompilation workspace: where sources and assembly live, where
/// the registry snapshot is persisted, and how the embedding provider is
/// reached.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::search::{DEFAULT_SEARCH_LIMIT, DEFAULT_SIMILARITY_THRESHOLD};
use crate::scanner::Arch;

// ── Default value functions ──────────────────────────────────────────

fn default_source_patterns() -> Vec<String> {
    vec!["src/**/*.c".to_string()]
}

fn default_build_dir() -> String {
    "build".to_string()
}

fn default_nonmatching_dir() -> String {
    "asm/non_matchings".to_string()
}

fn default_snapshot_path() -> String {
    "./funcdb.json".to_string()
}

fn default_arch() -> String {
    "arm".to_string()
}

fn default_model_name() -> String {
    "microsoft/codebert-base".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_api_key_env() -> String {
    "DECOMPRAG_API_KEY".to_string()
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_example_limit() -> usize {
    5
}

fn default_type_ignore() -> Vec<String> {
    [
        "void", "int", "char", "short", "long", "float", "double", "bool", "u8", "u16", "u32",
        "u64", "s8", "s16", "s32", "s64", "f32", "f64", "vu8", "vu16", "vu32", "size_t",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_source_patterns")]
    pub source_patterns: Vec<String>,

    #[serde(default = "default_build_dir")]
    pub build_dir: String,

    /// Root of assembly modules with no matched source yet.
    #[serde(default = "default_nonmatching_dir")]
    pub nonmatching_dir: String,

    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    #[serde(default = "default_arch")]
    pub arch: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// Primitive aliases never reported as required type definitions.
    #[serde(default = "default_type_ignore")]
    pub type_ignore: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider URL. Absent means embedding is skipped during indexing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Name of the environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Cap on similar-function examples in a translation context.
    #[serde(default = "default_example_limit")]
    pub example_limit: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            source_patterns: default_source_patterns(),
            build_dir: default_build_dir(),
            nonmatching_dir: default_nonmatching_dir(),
            snapshot_path: default_snapshot_path(),
            arch: default_arch(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            type_ignore: default_type_ignore(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model_name(),
            dimensions: default_dimensions(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            limit: default_search_limit(),
            example_limit: default_example_limit(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"decomprag.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "decomprag.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "decomprag.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values. An unsupported architecture selector
    /// is a fatal configuration error, not a silently-skipped case.
    pub fn validate(&self) -> Result<()> {
        self.arch()?;
        anyhow::ensure!(
            !self.source_patterns.is_empty(),
            "at least one source pattern must be specified"
        );
        anyhow::ensure!(self.search.limit > 0, "search.limit must be positive");
        anyhow::ensure!(
            (-1.0..=1.0).contains(&self.search.similarity_threshold),
            "search.similarity_threshold must be within -1..1"
        );
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        Ok(())
    }

    /// Parse the configured architecture selector.
    pub fn arch(&self) -> Result<Arch> {
        Ok(self.arch.parse()?)
    }

    /// Expand all source patterns and return matching source files.
    pub fn source_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = HashSet::new();

        for pattern in &self.source_patterns {
            match glob::glob(pattern) {
                Ok(matches) => {
                    for entry in matches.flatten() {
                        if entry.is_file() {
                            files.insert(entry);
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to expand pattern {pattern}: {e}");
                }
            }
        }

        let mut files: Vec<PathBuf> = files.into_iter().collect();
        files.sort();
        Ok(files)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
