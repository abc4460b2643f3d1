use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::Direction;
use crate::retriever::{depth_from_signed, SearchMode};
use crate::traversal::{MmrTraversalParams, TraversalOptions};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Graph store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub dimensions: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

/// Default retrieval parameters; the CLI can override each of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub fetch_k: usize,
    /// Signed so that a negative value is reported as an invalid parameter
    /// rather than a parse error.
    pub depth: i64,
    pub adjacent_k: Option<usize>,
    pub lambda: f32,
    pub score_threshold: Option<f32>,
    pub direction: Direction,
    pub concurrency: usize,
    pub store_timeout_ms: u64,
    pub edge_labels: Option<Vec<String>>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let mmr = MmrTraversalParams::default();
        let opts = TraversalOptions::default();
        Self {
            k: mmr.k,
            fetch_k: mmr.fetch_k,
            depth: mmr.depth as i64,
            adjacent_k: None,
            lambda: mmr.lambda,
            score_threshold: None,
            direction: opts.direction,
            concurrency: opts.concurrency,
            store_timeout_ms: opts.store_timeout.as_millis() as u64,
            edge_labels: None,
        }
    }
}

impl RetrievalConfig {
    pub fn depth(&self) -> crate::Result<usize> {
        depth_from_signed(self.depth)
    }

    pub fn mmr_params(&self) -> crate::Result<MmrTraversalParams> {
        Ok(MmrTraversalParams {
            k: self.k,
            fetch_k: self.fetch_k,
            depth: self.depth()?,
            lambda: self.lambda,
            score_threshold: self.score_threshold,
            adjacent_k: self.adjacent_k,
        })
    }

    /// Store-facing options. The metadata filter is per query and left empty.
    pub fn traversal_options(&self) -> TraversalOptions {
        TraversalOptions {
            direction: self.direction,
            concurrency: self.concurrency,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            edge_labels: self.edge_labels.clone(),
            ..TraversalOptions::default()
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_max_retries() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in KGRAG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("KGRAG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::load_from(&config_path)
    }

    /// Load and validate a specific config file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.embeddings.provider != "openai" {
            anyhow::bail!(
                "embeddings.provider '{}' is not supported (expected \"openai\")",
                self.embeddings.provider
            );
        }

        if self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        std::env::var(&self.embeddings.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                self.embeddings.api_key_env
            )
        })?;

        let retrieval = &self.retrieval;
        SearchMode::mmr(retrieval.mmr_params()?)
            .validate()
            .context("Invalid [retrieval] section")?;

        if retrieval.concurrency == 0 {
            anyhow::bail!("retrieval.concurrency must be greater than 0");
        }

        if retrieval.store_timeout_ms == 0 {
            anyhow::bail!("retrieval.store_timeout_ms must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.store.db_path
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.store.migrations_dir
    }

    /// API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        let var = &self.embeddings.api_key_env;
        std::env::var(var).with_context(|| format!("Environment variable {} not set", var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide cwd and env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const BASE_CONFIG: &str = r#"
[store]
db_path = "./graph.db"
log_level = "debug"

[embeddings]
provider = "openai"
model = "text-embedding-3-small"
api_key_env = "KGRAG_TEST_OPENAI_KEY"
dimensions = 1536
"#;

    fn write_config(temp_dir: &TempDir, extra: &str) -> PathBuf {
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, format!("{}{}", BASE_CONFIG, extra)).unwrap();
        path.canonicalize().unwrap()
    }

    /// Restores cwd when dropped (e.g. on panic).
    struct CwdGuard(PathBuf);
    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn with_config_env(config_path: &Path, api_key: Option<&str>, f: impl FnOnce()) {
        let original_config = std::env::var("KGRAG_CONFIG").ok();
        let original_key = std::env::var("KGRAG_TEST_OPENAI_KEY").ok();
        std::env::set_var("KGRAG_CONFIG", config_path.to_str().unwrap());
        match api_key {
            Some(k) => std::env::set_var("KGRAG_TEST_OPENAI_KEY", k),
            None => std::env::remove_var("KGRAG_TEST_OPENAI_KEY"),
        }
        f();
        std::env::remove_var("KGRAG_CONFIG");
        std::env::remove_var("KGRAG_TEST_OPENAI_KEY");
        if let Some(val) = original_config {
            std::env::set_var("KGRAG_CONFIG", val);
        }
        if let Some(val) = original_key {
            std::env::set_var("KGRAG_TEST_OPENAI_KEY", val);
        }
    }

    #[test]
    fn test_config_load_with_defaults() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "");
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.store.log_level, "debug");
            assert_eq!(config.migrations_dir(), Path::new("migrations"));
            assert_eq!(config.embeddings.cache_capacity, 1000);
            assert_eq!(config.embeddings.max_retries, 3);
            assert_eq!(config.api_key().unwrap(), "test-key");

            let r = &config.retrieval;
            assert_eq!((r.k, r.fetch_k, r.depth), (4, 100, 2));
            assert_eq!(r.lambda, 0.5);
            let opts = r.traversal_options();
            assert_eq!(opts.direction, Direction::Outgoing);
            assert_eq!(opts.concurrency, 8);
            assert_eq!(opts.store_timeout, Duration::from_millis(5000));
        });
    }

    #[test]
    fn test_config_retrieval_overrides() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(
            &temp_dir,
            r#"
[retrieval]
k = 2
fetch_k = 3
depth = 1
adjacent_k = 5
lambda = 0.7
direction = "both"
edge_labels = ["MARRIED_TO"]
"#,
        );
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load().unwrap();
            let params = config.retrieval.mmr_params().unwrap();
            assert_eq!(params.k, 2);
            assert_eq!(params.fetch_k, 3);
            assert_eq!(params.depth, 1);
            assert_eq!(params.adjacent_k, Some(5));
            let opts = config.retrieval.traversal_options();
            assert_eq!(opts.direction, Direction::Both);
            assert_eq!(opts.edge_labels, Some(vec!["MARRIED_TO".to_string()]));
        });
    }

    #[test]
    fn test_config_rejects_invalid_retrieval() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        for (section, needle) in [
            ("[retrieval]\nk = 5\nfetch_k = 3\n", "fetch_k"),
            ("[retrieval]\ndepth = -1\n", "depth"),
            ("[retrieval]\nlambda = 1.5\n", "lambda"),
            ("[retrieval]\nconcurrency = 0\n", "concurrency"),
        ] {
            let temp_dir = TempDir::new().unwrap();
            let config_path = write_config(&temp_dir, section);
            with_config_env(&config_path, Some("test-key"), || {
                let err = Config::load().unwrap_err();
                assert!(format!("{:#}", err).contains(needle), "{section}: {err:#}");
            });
        }
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "");
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_err(), "Expected missing API key error");
            assert!(config.unwrap_err().to_string().contains("KGRAG_TEST_OPENAI_KEY"));
        });
    }

    #[test]
    fn test_config_loads_from_env_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "");
        fs::write(temp_dir.path().join(".env"), "KGRAG_TEST_OPENAI_KEY=test-key-from-env-file\n").unwrap();
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_ok(), "Config should load with API key from .env file");
            assert_eq!(config.unwrap().api_key().unwrap(), "test-key-from-env-file");
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("KGRAG_CONFIG").ok();
        std::env::set_var("KGRAG_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("KGRAG_CONFIG");
        if let Some(v) = original {
            std::env::set_var("KGRAG_CONFIG", v);
        }
    }
}
