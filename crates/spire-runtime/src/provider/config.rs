//! The `config` service.

use std::sync::Arc;

use serde_json::Value;
use spire_core::{BoxError, Container, Service, ServiceParams, ServiceProvider};

use crate::contract::{CONFIG_KEY, Config};

/// Dotted-key lookups over the merged configuration tree.
///
/// Segments address object keys, or array indices when numeric:
/// `database.replicas.0.host`.
#[derive(Debug, Clone, Default)]
pub struct SpireConfigService {
    tree: Value,
}

impl SpireConfigService {
    pub fn new(tree: Value) -> Self {
        Self { tree }
    }

    fn find(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }
        key.split('.').try_fold(&self.tree, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl Config for SpireConfigService {
    fn is_exist(&self, key: &str) -> bool {
        self.find(key).is_some_and(|value| !value.is_null())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.find(key).filter(|value| !value.is_null()).cloned()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.find(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.find(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.find(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Binds [`SpireConfigService`] under `config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvider {
    tree: Value,
}

impl ConfigProvider {
    pub fn new(tree: Value) -> Self {
        Self { tree }
    }
}

impl ServiceProvider for ConfigProvider {
    fn name(&self) -> &str {
        CONFIG_KEY
    }

    fn register(&self, _container: &Container, _params: &ServiceParams) -> Result<Service, BoxError> {
        let service = SpireConfigService::new(self.tree.clone());
        Ok(Service::new(Arc::new(service) as Arc<dyn Config>))
    }
}
