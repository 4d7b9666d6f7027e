//! Adapter registry and factory
//!
//! Maps adapter names to live instances. Instances are built from JSON
//! credential objects by named factories, so configuration never has to know
//! concrete adapter types.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::providers::{alipay, card, crypto, paypal, wechat};
use crate::payments::providers::{AlipayAdapter, CardAdapter, CryptoAdapter, PayPalAdapter, WeChatAdapter};
use crate::payments::traits::PaymentAdapter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub type AdapterFactory =
    Arc<dyn Fn(serde_json::Value) -> PaymentResult<Arc<dyn PaymentAdapter>> + Send + Sync>;

/// Config key naming the factory when an entry's name is not a provider name,
/// e.g. a second card account registered as `card-eu`.
const PROVIDER_KEY: &str = "provider";

pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
    adapters: RwLock<HashMap<String, Arc<dyn PaymentAdapter>>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    /// Registry with factories for every built-in provider and no adapters.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            adapters: RwLock::new(HashMap::new()),
        };
        registry.register_factory(card::NAME, |v| Ok(Arc::new(CardAdapter::from_value(v)?)));
        registry.register_factory(paypal::NAME, |v| Ok(Arc::new(PayPalAdapter::from_value(v)?)));
        registry.register_factory(alipay::NAME, |v| Ok(Arc::new(AlipayAdapter::from_value(v)?)));
        registry.register_factory(wechat::NAME, |v| Ok(Arc::new(WeChatAdapter::from_value(v)?)));
        registry.register_factory(crypto::NAME, |v| Ok(Arc::new(CryptoAdapter::from_value(v)?)));
        registry
    }

    /// Build every configured adapter, skipping the ones that fail.
    pub fn from_settings(settings: &HashMap<String, serde_json::Value>) -> Self {
        let registry = Self::new();
        let mut names: Vec<_> = settings.keys().collect();
        names.sort();
        for name in names {
            let value = settings[name].clone();
            let provider = value
                .get(PROVIDER_KEY)
                .and_then(|p| p.as_str())
                .unwrap_or(name)
                .to_string();
            let result = registry
                .create_adapter(&provider, value)
                .and_then(|adapter| registry.register_as(name, adapter));
            if let Err(e) = result {
                warn!("Skipping payment adapter '{}': {}", name, e);
            }
        }
        registry
    }

    pub fn register_factory<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(serde_json::Value) -> PaymentResult<Arc<dyn PaymentAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Build an adapter by factory name without registering it.
    pub fn create_adapter(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> PaymentResult<Arc<dyn PaymentAdapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PaymentError::unknown_adapter(name))?;
        factory(config)
    }

    /// Register under the adapter's own name.
    pub fn register(&self, adapter: Arc<dyn PaymentAdapter>) -> PaymentResult<()> {
        let name = adapter.name().to_string();
        self.register_as(&name, adapter)
    }

    /// Register under `name`; adapters with incomplete credentials are refused.
    pub fn register_as(&self, name: &str, adapter: Arc<dyn PaymentAdapter>) -> PaymentResult<()> {
        if !adapter.validate_config() {
            warn!("Refusing to register '{}': configuration is incomplete", name);
            return Err(PaymentError::config(format!(
                "adapter '{}' has an invalid configuration",
                name
            )));
        }
        if self
            .adapters
            .write()
            .insert(name.to_string(), adapter)
            .is_some()
        {
            info!("Replaced payment adapter '{}'", name);
        } else {
            info!("Registered payment adapter '{}'", name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PaymentAdapter>> {
        self.adapters.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.read().contains_key(name)
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.read().keys().cloned().collect();
        names.sort();
        names
    }
}
