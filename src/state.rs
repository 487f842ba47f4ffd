use std::sync::Arc;

use crate::config::{Backend, Config};
use crate::registry::HeroRegistry;
use crate::store::memory::MemoryStore;
use crate::store::tantivy_store::TantivyStore;
use crate::store::HeroStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<HeroRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn HeroStore> = match config.backend {
            Backend::Tantivy => {
                // Ensure data directories exist
                std::fs::create_dir_all(config.index_dir())?;
                Arc::new(TantivyStore::open_or_create(
                    &config.index_dir(),
                    &config.meta_path(),
                )?)
            }
            Backend::Memory => Arc::new(MemoryStore::new()),
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn HeroStore>) -> Self {
        let registry = HeroRegistry::new(store).with_page_limits(config.page_limits());
        Self {
            config,
            registry: Arc::new(registry),
        }
    }
}
