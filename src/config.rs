use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::registry::PageLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the hero index and metadata are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Storage backend
    pub backend: Backend,
    /// Name of the index holding hero documents
    pub hero_index: String,
    /// Name of the metadata namespace holding the licence counter
    pub meta_index: String,
    /// Page size when a request does not ask for one
    pub page_size: usize,
    /// Largest page a request may ask for
    pub max_page_size: usize,
    /// Upper bound on a single registry call made by an HTTP handler
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Persistent tantivy index under `data_dir`
    Tantivy,
    /// Process-local, lost on exit
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tantivy" => Ok(Backend::Tantivy),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            backend: Backend::Tantivy,
            hero_index: "heroes".to_string(),
            meta_index: "heroesmeta".to_string(),
            page_size: 10,
            max_page_size: 100,
            write_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("HERO_REGISTRY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("HERO_REGISTRY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(val) = std::env::var("HERO_REGISTRY_BACKEND") {
            match val.parse() {
                Ok(backend) => config.backend = backend,
                Err(e) => tracing::warn!("Ignoring HERO_REGISTRY_BACKEND: {e}"),
            }
        }
        if let Ok(name) = std::env::var("HERO_REGISTRY_HERO_INDEX") {
            config.hero_index = name;
        }
        if let Ok(name) = std::env::var("HERO_REGISTRY_META_INDEX") {
            config.meta_index = name;
        }
        if let Ok(val) = std::env::var("HERO_REGISTRY_PAGE_SIZE") {
            if let Ok(v) = val.parse() {
                config.page_size = v;
            }
        }
        if let Ok(val) = std::env::var("HERO_REGISTRY_MAX_PAGE_SIZE") {
            if let Ok(v) = val.parse() {
                config.max_page_size = v;
            }
        }
        if let Ok(val) = std::env::var("HERO_REGISTRY_WRITE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.write_timeout_secs = v.min(60); // Cap at 60s
            }
        }

        config
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index").join(&self.hero_index)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.meta_index))
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.page_size.min(self.max_page_size),
            max_limit: self.max_page_size,
        }
    }

    pub fn write_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.write_timeout_secs)
    }
}
