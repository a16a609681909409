//! Environment key-value stores.
//!
//! The request-runner keeps all pagination state as string variables in its
//! environment. Handlers reach that state only through [`EnvironmentStore`]:
//!
//! - [`MemoryEnvironment`]: process-local, used by tests and one-shot runs
//! - [`SqliteEnvironment`]: file-backed, survives between CLI invocations,
//!   optionally sealing secret keys (the credential) with AES-256-GCM
//!
//! Values are opaque text. The accumulator decides what they mean.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

mod seal;
mod sqlite;

pub use seal::{open, parse_master_key, seal, Sealed};
pub use sqlite::SqliteEnvironment;

/// String-valued environment shared with the request-runner.
pub trait EnvironmentStore {
    /// Returns the value for `key`, or `None` if unset.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Sets `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Returns `false` if it was not set.
    fn unset(&self, key: &str) -> Result<bool>;

    /// All keys currently set, sorted.
    fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory environment.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: Mutex<BTreeMap<String, String>>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an environment with existing variables.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Mutex::new(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn vars(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.vars
            .lock()
            .map_err(|_| anyhow!("environment lock poisoned"))
    }
}

impl EnvironmentStore for MemoryEnvironment {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.vars()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.vars()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&self, key: &str) -> Result<bool> {
        Ok(self.vars()?.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.vars()?.keys().cloned().collect())
    }
}
