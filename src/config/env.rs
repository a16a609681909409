use super::PagekeepConfig;
use crate::resource::KeyScheme;
use anyhow::{Context, Result};

/// Applies `PAGEKEEP_*` overrides on top of a loaded config, using `lookup`
/// to resolve variable names (`std::env::var` in the binary).
///
/// Recognized variables:
/// - `PAGEKEEP_STORE_PATH`
/// - `PAGEKEEP_CREDENTIAL_KEY`
/// - `PAGEKEEP_ENCRYPTION_KEY`
/// - `PAGEKEEP_LIKE_USER_KEYS` (`shared` or `namespaced`)
pub fn apply_overrides_from<F>(config: &mut PagekeepConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PAGEKEEP_STORE_PATH") {
        config.store.path = v;
    }
    if let Some(v) = lookup("PAGEKEEP_CREDENTIAL_KEY") {
        config.store.credential_key = v;
    }
    if let Some(v) = lookup("PAGEKEEP_ENCRYPTION_KEY") {
        config.store.encryption_key = Some(v);
    }
    if let Some(v) = lookup("PAGEKEEP_LIKE_USER_KEYS") {
        config.keys.like_users = v
            .parse::<KeyScheme>()
            .context("PAGEKEEP_LIKE_USER_KEYS must be 'shared' or 'namespaced'")?;
    }
    Ok(())
}
