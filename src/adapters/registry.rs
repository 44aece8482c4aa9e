use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use crate::adapters::traits::ChainProvider;
use crate::ledger::models::ProviderKind;

/// Chain providers keyed by the `btc_provider` setting value
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ChainProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn ChainProvider>) {
        info!("Registering chain provider: {}", provider.kind());
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ChainProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
