use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of search results
const DEFAULT_K: usize = 5;
/// Default timeout for a single embedding call in seconds
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 60;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional expected embedding dimension; validated against the loaded
    /// model at startup.
    #[serde(default)]
    pub dimension: Option<usize>,

    /// Default number of results for search
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Timeout for a single embedding call in seconds
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            dimension: None,
            default_k: DEFAULT_K,
            embed_timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            base_path: String::new(),
        }
    }
}

fn default_model() -> String {
    crate::semantic::DEFAULT_MODEL.to_string()
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.default_k == 0 {
            anyhow::bail!("default_k must be at least 1");
        }
        if self.embed_timeout_secs == 0 {
            anyhow::bail!("embed_timeout_secs must be greater than 0");
        }
        if self.download_timeout_secs == 0 {
            anyhow::bail!("download_timeout_secs must be greater than 0");
        }
        if self.dimension == Some(0) {
            anyhow::bail!("dimension, when set, must be greater than 0");
        }
        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(base_path).join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&config_path, defaults)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self =
            serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = PathBuf::from(&self.base_path).join("config.yaml");
        let temp_path = config_path.with_extension("yaml.tmp");

        std::fs::write(&temp_path, serde_yml::to_string(self)?)?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn notes_path(&self) -> PathBuf {
        PathBuf::from(&self.base_path).join("notes.csv")
    }

    pub fn vectors_path(&self) -> PathBuf {
        PathBuf::from(&self.base_path).join("vectors.bin")
    }
}

/// Base directory for all data files: `MEMO_BASE_PATH` or
/// `~/.local/share/memo`. Created if absent.
pub fn resolve_base_path() -> anyhow::Result<String> {
    let base_path = match std::env::var("MEMO_BASE_PATH") {
        Ok(path) => path,
        Err(_) => {
            let home = homedir::my_home()
                .context("could not determine home directory")?
                .context("home directory path is empty")?;
            format!("{}/.local/share/memo", home.to_string_lossy())
        }
    };

    std::fs::create_dir_all(&base_path).context("failed to create application base directory")?;

    Ok(base_path)
}
