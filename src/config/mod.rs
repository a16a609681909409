pub mod env;
pub use env::apply_overrides_from;

use crate::accumulator::DEFAULT_CREDENTIAL_KEY;
use crate::resource::{KeyScheme, ResourceConfig, ResourceRegistry};
use crate::store::SqliteEnvironment;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "pagekeep.toml";

/// Complete pagekeep configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PagekeepConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    /// Extra resource kinds, or replacements for built-in ones
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Environment store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite file holding the runner environment
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Key refreshed access tokens are written to
    #[serde(default = "default_credential_key")]
    pub credential_key: String,
    /// Base64 32-byte key; when set the credential is encrypted at rest
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_store_path() -> String {
    "pagekeep.db".to_string()
}

fn default_credential_key() -> String {
    DEFAULT_CREDENTIAL_KEY.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            credential_key: default_credential_key(),
            encryption_key: None,
        }
    }
}

/// Key layout configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub like_users: KeyScheme,
}

impl PagekeepConfig {
    /// Checks that every configured resource kind is usable.
    pub fn validate(&self) -> Result<()> {
        if self.store.credential_key.is_empty() {
            return Err(anyhow!("store.credential_key must not be empty"));
        }
        for resource in &self.resources {
            if resource.name.is_empty() {
                return Err(anyhow!("resource kind with empty name"));
            }
            if resource.accumulator_key.is_empty() || resource.cursor_key.is_empty() {
                return Err(anyhow!(
                    "resource '{}' needs both accumulator_key and cursor_key",
                    resource.name
                ));
            }
            if resource.accumulator_key == resource.cursor_key {
                return Err(anyhow!(
                    "resource '{}' uses '{}' for both accumulator and cursor",
                    resource.name,
                    resource.cursor_key
                ));
            }
            let credential = &self.store.credential_key;
            if &resource.accumulator_key == credential || &resource.cursor_key == credential {
                return Err(anyhow!(
                    "resource '{}' would overwrite the credential key '{}'",
                    resource.name,
                    credential
                ));
            }
        }
        Ok(())
    }

    /// Built-in kinds under the configured key scheme plus configured kinds.
    pub fn registry(&self) -> ResourceRegistry {
        ResourceRegistry::with_overrides(self.keys.like_users, &self.resources)
    }

    /// Opens the SQLite environment, sealing the credential key if an
    /// encryption key is configured.
    pub fn open_store(&self) -> Result<SqliteEnvironment> {
        let store = SqliteEnvironment::new(&self.store.path)?;
        match &self.store.encryption_key {
            Some(key) => store.with_secret_keys(key, [self.store.credential_key.clone()]),
            None => Ok(store),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PagekeepConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: PagekeepConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Resolves the configuration for one run.
///
/// # Arguments
/// * `explicit` - `--config` path; a missing file is an error
/// * `dir` - directory searched for [`DEFAULT_CONFIG_FILE`]
/// * `lookup` - resolves `PAGEKEEP_*` variables, applied after the file
///
/// # Returns
/// * `Ok(PagekeepConfig)` - Validated configuration
/// * `Err` - If the file cannot be loaded, an override is invalid, or validation fails
pub fn resolve_config<F>(explicit: Option<&Path>, dir: &Path, lookup: F) -> Result<PagekeepConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let default_file = dir.join(DEFAULT_CONFIG_FILE);
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None if default_file.exists() => load_config(&default_file)?,
        None => PagekeepConfig::default(),
    };
    apply_overrides_from(&mut config, lookup)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
