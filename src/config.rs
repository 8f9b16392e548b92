use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

use crate::services::{scorers::NeighborParams, EngineConfig, EnsembleWeights, ServiceSettings};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL connection URL; ratings are kept in memory when unset
    pub database_url: Option<String>,

    /// Directory holding `u.data` and `u.item`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Latent-factor rank
    #[serde(default = "default_rank")]
    pub rank: usize,

    #[serde(default = "default_neighbor_count")]
    pub neighbor_count: usize,

    #[serde(default = "default_neighbor_top_k")]
    pub neighbor_top_k: usize,

    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,

    #[serde(default = "default_candidate_item_limit")]
    pub candidate_item_limit: usize,

    /// Ensemble members and weights, e.g. `svd=0.4,nmf=0.3,content=0.3`
    #[serde(default = "default_ensemble_weights")]
    pub ensemble_weights: String,

    #[serde(default = "default_nmf_max_iter")]
    pub nmf_max_iter: usize,

    #[serde(default = "default_svd_iterations")]
    pub svd_iterations: usize,

    /// Vocabulary cap of the content model
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    /// Share of ratings held out of training for evaluation
    #[serde(default = "default_split_ratio")]
    pub split_ratio: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// How long a cached result is served
    #[serde(default = "default_cache_timeout_seconds")]
    pub cache_timeout_seconds: u64,

    /// Age at which the sweep deletes an entry
    #[serde(default = "default_cache_retention_ceiling_seconds")]
    pub cache_retention_ceiling_seconds: u64,

    #[serde(default = "default_cache_sweep_interval_seconds")]
    pub cache_sweep_interval_seconds: u64,

    /// Optional per-request scoring deadline
    pub request_deadline_ms: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("ml-100k")
}

fn default_rank() -> usize {
    50
}

fn default_neighbor_count() -> usize {
    20
}

fn default_neighbor_top_k() -> usize {
    10
}

fn default_similarity_floor() -> f64 {
    0.1
}

fn default_candidate_item_limit() -> usize {
    100
}

fn default_ensemble_weights() -> String {
    "svd=0.4,nmf=0.3,content=0.3".to_string()
}

fn default_nmf_max_iter() -> usize {
    200
}

fn default_svd_iterations() -> usize {
    30
}

fn default_max_features() -> usize {
    100
}

fn default_split_ratio() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_cache_timeout_seconds() -> u64 {
    300
}

fn default_cache_retention_ceiling_seconds() -> u64 {
    1800
}

fn default_cache_sweep_interval_seconds() -> u64 {
    60
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..1.0).contains(&self.split_ratio) {
            anyhow::bail!("SPLIT_RATIO must be in [0, 1), got {}", self.split_ratio);
        }
        if self.cache_sweep_interval_seconds == 0 {
            anyhow::bail!("CACHE_SWEEP_INTERVAL_SECONDS must be positive");
        }
        self.weights()?;
        Ok(())
    }

    fn weights(&self) -> anyhow::Result<EnsembleWeights> {
        self.ensemble_weights
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid ENSEMBLE_WEIGHTS: {}", e))
    }

    /// Fitting parameters for the engine
    pub fn engine(&self) -> anyhow::Result<EngineConfig> {
        Ok(EngineConfig {
            rank: self.rank,
            svd_iterations: self.svd_iterations,
            nmf_max_iter: self.nmf_max_iter,
            neighbors: NeighborParams {
                neighbor_count: self.neighbor_count,
                top_k: self.neighbor_top_k,
                similarity_floor: self.similarity_floor,
                candidate_item_limit: self.candidate_item_limit,
            },
            max_features: self.max_features,
            ensemble_weights: self.weights()?,
            split_ratio: self.split_ratio,
            seed: self.seed,
        })
    }

    pub fn service(&self) -> anyhow::Result<ServiceSettings> {
        Ok(ServiceSettings {
            engine: self.engine()?,
            cache_timeout: Duration::from_secs(self.cache_timeout_seconds),
            request_deadline: self.request_deadline_ms.map(Duration::from_millis),
        })
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_seconds)
    }

    pub fn cache_retention_ceiling(&self) -> Duration {
        Duration::from_secs(self.cache_retention_ceiling_seconds)
    }
}
