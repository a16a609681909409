//! Lookup table of configured resource kinds.

use super::{KeyScheme, ResourceConfig, ResourceKind};
use anyhow::{anyhow, Result};

/// All resource kinds known to this process, in declaration order.
///
/// Starts from the built-in kinds; configured kinds with the same name replace
/// the built-in entry, new names are appended.
#[derive(Clone, Debug)]
pub struct ResourceRegistry {
    resources: Vec<ResourceConfig>,
}

impl ResourceRegistry {
    /// Built-in kinds only.
    pub fn builtin(scheme: KeyScheme) -> Self {
        Self {
            resources: ResourceKind::ALL
                .iter()
                .map(|kind| kind.config(scheme))
                .collect(),
        }
    }

    /// Built-in kinds plus configured overrides/extras.
    pub fn with_overrides(scheme: KeyScheme, overrides: &[ResourceConfig]) -> Self {
        let mut registry = Self::builtin(scheme);
        for config in overrides {
            registry.insert(config.clone());
        }
        registry
    }

    /// Adds a kind, replacing any existing kind with the same name.
    pub fn insert(&mut self, config: ResourceConfig) {
        match self.resources.iter_mut().find(|r| r.name == config.name) {
            Some(existing) => *existing = config,
            None => self.resources.push(config),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Like [`get`](Self::get) but errors with the list of known kinds.
    pub fn require(&self, name: &str) -> Result<&ResourceConfig> {
        self.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.resources.iter().map(|r| r.name.as_str()).collect();
            anyhow!("unknown resource kind '{}' (known: {})", name, known.join(", "))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
