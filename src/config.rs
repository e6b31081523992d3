use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Service configuration, persisted as `config.yaml` in the base directory.
///
/// Every knob has a default so a missing or partial file still yields a
/// working setup. Defaults mirror the reference deployment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Base URL of an OpenAI-compatible API. Chat completions and embeddings
    /// are requested under this prefix.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token. When empty the service starts with the mock provider.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Must match the provider's output dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_soft_cap")]
    pub soft_cap: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_days")]
    pub ttl_days: i64,
    #[serde(default = "default_cache_path")]
    pub persistence_path: String,
    #[serde(default = "default_persist_every")]
    pub persist_every_n_mutations: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default = "default_eviction_capacity")]
    pub capacity: usize,
    #[serde(default = "default_headroom")]
    pub headroom: usize,
    #[serde(default = "default_protect_window_minutes")]
    pub protect_window_minutes: i64,
    #[serde(default = "default_random_trigger")]
    pub random_trigger_probability: f64,
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_freq_weight")]
    pub freq_weight: f32,
    #[serde(default = "default_drop_ratio")]
    pub drop_ratio: f32,
    #[serde(default = "default_min_absolute")]
    pub min_absolute: f32,
    #[serde(default = "default_k_lexical")]
    pub k_lexical: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retries() -> u32 {
    3
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_dimension() -> usize {
    2048
}
fn default_store_path() -> String {
    "web_memory.json".to_string()
}
fn default_staleness_days() -> i64 {
    3
}
fn default_soft_cap() -> usize {
    10_000
}
fn default_cache_capacity() -> usize {
    1_000
}
fn default_cache_ttl_days() -> i64 {
    7
}
fn default_cache_path() -> String {
    "query_embeddings_cache.json".to_string()
}
fn default_persist_every() -> u64 {
    20
}
fn default_eviction_capacity() -> usize {
    1_000
}
fn default_headroom() -> usize {
    50
}
fn default_protect_window_minutes() -> i64 {
    60
}
fn default_random_trigger() -> f64 {
    0.01
}
fn default_sweep_interval_minutes() -> u64 {
    30
}
fn default_max_results() -> usize {
    10
}
fn default_semantic_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_freq_weight() -> f32 {
    0.1
}
fn default_drop_ratio() -> f32 {
    0.4
}
fn default_min_absolute() -> f32 {
    0.2
}
fn default_k_lexical() -> usize {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}
impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
        }
    }
}
impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: default_dimension() }
    }
}
impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path(), staleness_days: default_staleness_days() }
    }
}
impl Default for VectorConfig {
    fn default() -> Self {
        Self { soft_cap: default_soft_cap() }
    }
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_days: default_cache_ttl_days(),
            persistence_path: default_cache_path(),
            persist_every_n_mutations: default_persist_every(),
        }
    }
}
impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            capacity: default_eviction_capacity(),
            headroom: default_headroom(),
            protect_window_minutes: default_protect_window_minutes(),
            random_trigger_probability: default_random_trigger(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}
impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            freq_weight: default_freq_weight(),
            drop_ratio: default_drop_ratio(),
            min_absolute: default_min_absolute(),
            k_lexical: default_k_lexical(),
        }
    }
}

impl Config {
    /// Load `config.yaml` from the base directory, writing a default file
    /// first when none exists.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join("config.yaml");
        if !path.exists() {
            let config = Self::default();
            config.save(base_path)?;
            return Ok(config);
        }

        let config_str = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            serde_yml::from_str(&config_str).context("config.yaml is malformed")?;
        Ok(config)
    }

    pub fn save(&self, base_path: &Path) -> anyhow::Result<()> {
        let path = base_path.join("config.yaml");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config_str = serde_yml::to_string(self).context("failed to serialize config")?;
        fs::write(&path, config_str)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Resolve a file path from the config relative to the base directory.
    pub fn resolve(&self, base_path: &Path, file: &str) -> PathBuf {
        let p = Path::new(file);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base_path.join(p)
        }
    }
}
