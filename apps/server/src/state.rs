//! Shared application state

use crate::config::Config;
use crate::datasource::{InMemoryProvider, InMemoryStore};
use crate::operations::register_demo_operations;
use crate::processor::batch::BatchLimits;
use crate::processor::OperationRegistry;
use crate::service::{ODataService, ServiceOptions};
use anyhow::Context;
use oxidata_edm::Edm;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<ODataService>,
    pub store: InMemoryStore,
}

impl AppState {
    /// Loads the model and optional seed data named in `config`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let edm = Edm::from_file(&config.service.model_path).with_context(|| {
            format!("Failed to load entity data model from {}", config.service.model_path)
        })?;

        let seed = match &config.service.seed_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read seed data from {path}"))?;
                Some(serde_json::from_str(&text).with_context(|| format!("Invalid seed data in {path}"))?)
            }
            None => None,
        };

        Self::from_parts(config, Arc::new(edm), seed)
    }

    /// Builds the state around an already loaded model.
    pub fn from_parts(
        config: Config,
        edm: Arc<Edm>,
        seed: Option<serde_json::Value>,
    ) -> anyhow::Result<Self> {
        let store = InMemoryStore::new(edm.clone());
        if let Some(seed) = &seed {
            let loaded = store
                .load_seed(seed)
                .map_err(|e| anyhow::anyhow!("Failed to load seed data: {e}"))?;
            tracing::info!(entities = loaded, "Seed data loaded");
        }

        let mut operations = OperationRegistry::new();
        register_demo_operations(&mut operations, &store, seed);

        let provider =
            InMemoryProvider::new(store.clone()).with_native_patch(config.service.native_patch);
        let service = ODataService::builder(edm)
            .provider(Arc::new(provider))
            .operations(operations)
            .options(ServiceOptions {
                batch_limits: BatchLimits {
                    max_parts: config.batch.max_parts,
                    max_changeset_size: config.batch.max_changeset_size,
                },
                reuse_request_content_length: config.batch.reuse_request_content_length,
            })
            .build();

        Ok(Self {
            config: Arc::new(config),
            service: Arc::new(service),
            store,
        })
    }
}
