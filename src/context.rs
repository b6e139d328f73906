use std::sync::Arc;

use crate::{adapter::ResourceAdapter, config::BridgeConfig};

/// Everything the bridge components share, built once by the embedding
/// application and handed to each constructor.
#[derive(Clone)]
pub struct BridgeContext {
    config: Arc<BridgeConfig>,
    adapter: Arc<dyn ResourceAdapter>,
}

impl BridgeContext {
    pub fn new(config: BridgeConfig, adapter: Arc<dyn ResourceAdapter>) -> Self {
        Self {
            config: Arc::new(config),
            adapter,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn ResourceAdapter> {
        &self.adapter
    }
}
