//! Paginated response accumulation.
//!
//! Invoked once per HTTP response. Each call classifies the envelope and then
//! either reports an error, stores a refreshed credential, finishes a
//! pagination, or appends one page of items to the running list:
//!
//! ```text
//!   Idle ──page──▶ Accumulating ──page──▶ Accumulating
//!    ▲                                        │
//!    └──────────── {message, info: "Done"} ───┘
//! ```
//!
//! A corrupted accumulator value restarts from an empty list. Errors never
//! leave [`ResponseHandler::handle`]; they end the invocation with a log line
//! and a matching [`Outcome`].

use crate::envelope::{extract_page, Classification, ErrorDetail, PageError, ResponseEnvelope};
use crate::resource::ResourceConfig;
use crate::store::EnvironmentStore;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{error, info, warn};

#[cfg(test)]
mod tests;

/// Environment key the refreshed bearer token is written to by default.
pub const DEFAULT_CREDENTIAL_KEY: &str = "JWT";

/// What a single invocation did.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Non-200 response; nothing written.
    TransportError(ErrorDetail),
    /// Credential stored; the caller must re-send the request.
    TokenRefreshed,
    /// Message envelope that did not finish a pagination.
    Message,
    /// Pagination finished; holds the items that were cleared.
    Completed { items: Vec<Value> },
    /// Page envelope without the expected array; nothing written.
    MalformedPage(PageError),
    /// Page appended.
    Accumulated {
        added: usize,
        total: usize,
        /// Cursor written by this call, `None` if it was left as is.
        cursor: Option<String>,
    },
    /// The environment could not be read or written.
    StoreFailure(String),
}

/// Applies response envelopes to an environment.
pub struct ResponseHandler<'a> {
    store: &'a dyn EnvironmentStore,
    credential_key: String,
}

impl<'a> ResponseHandler<'a> {
    pub fn new(store: &'a dyn EnvironmentStore) -> Self {
        Self {
            store,
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
        }
    }

    /// Writes refreshed tokens to `key` instead of `JWT`.
    pub fn with_credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    pub fn credential_key(&self) -> &str {
        &self.credential_key
    }

    /// Handles one response for the given resource kind.
    pub fn handle(&self, envelope: &ResponseEnvelope, config: &ResourceConfig) -> Outcome {
        match envelope.classify() {
            Classification::TransportError(detail) => {
                error!(
                    kind = %config.name,
                    status = %detail.status,
                    detail = %detail.detail,
                    "Error fetching {}",
                    config.label
                );
                Outcome::TransportError(detail)
            }
            Classification::TokenRefresh(token) => self.refresh_token(config, &token),
            Classification::Message { done } => self.message(envelope, config, done),
            Classification::Page => self.page(envelope, config),
        }
    }

    fn refresh_token(&self, config: &ResourceConfig, token: &str) -> Outcome {
        if let Err(e) = self.store.set(&self.credential_key, token) {
            return store_failure(config, e);
        }
        info!(
            kind = %config.name,
            key = %self.credential_key,
            "Token refreshed. Re-send request."
        );
        Outcome::TokenRefreshed
    }

    fn message(&self, envelope: &ResponseEnvelope, config: &ResourceConfig, done: bool) -> Outcome {
        info!(kind = %config.name, response = %envelope.body, "Received message");
        if !done {
            return Outcome::Message;
        }

        let items = match load_items(self.store, config) {
            Ok(items) => items,
            Err(e) => return store_failure(config, e),
        };
        if items.is_empty() {
            return Outcome::Message;
        }

        let collected = Value::Array(items.clone());
        info!(
            kind = %config.name,
            count = items.len(),
            items = %collected,
            "All {} collected",
            config.label
        );
        if let Err(e) = clear(self.store, config) {
            return store_failure(config, e);
        }
        Outcome::Completed { items }
    }

    fn page(&self, envelope: &ResponseEnvelope, config: &ResourceConfig) -> Outcome {
        let page = match extract_page(envelope, config) {
            Ok(page) => page,
            Err(e) => {
                error!(
                    kind = %config.name,
                    error = %e,
                    response = %envelope.body,
                    "Unexpected {} response",
                    config.label
                );
                return Outcome::MalformedPage(e);
            }
        };

        let mut items = match load_items(self.store, config) {
            Ok(items) => items,
            Err(e) => return store_failure(config, e),
        };
        let added = append(&mut items, page.items, config.dedupe_by.as_deref());

        if let Err(e) = save(self.store, config, &items, page.cursor.as_deref()) {
            return store_failure(config, e);
        }

        match &page.cursor {
            Some(cursor) => info!(kind = %config.name, cursor = %cursor, "Last {} cursor", config.label),
            None => warn!(
                kind = %config.name,
                "Page has no last item id; {} left unchanged",
                config.cursor_key
            ),
        }
        if items.is_empty() {
            info!(kind = %config.name, items = "[]", "Accumulated {}", config.label);
        } else {
            let accumulated = Value::Array(items.clone());
            info!(
                kind = %config.name,
                added,
                total = items.len(),
                items = %accumulated,
                "Accumulated {}",
                config.label
            );
        }

        Outcome::Accumulated {
            added,
            total: items.len(),
            cursor: page.cursor,
        }
    }
}

/// Handles one response against `store` using the default credential key.
pub fn handle_response(
    envelope: &ResponseEnvelope,
    config: &ResourceConfig,
    store: &dyn EnvironmentStore,
) -> Outcome {
    ResponseHandler::new(store).handle(envelope, config)
}

/// Reads the accumulated items for a kind.
///
/// An unset key is an empty list. A value that is not a JSON array is logged
/// and discarded. Only store I/O failures are returned as errors.
pub fn load_items(store: &dyn EnvironmentStore, config: &ResourceConfig) -> Result<Vec<Value>> {
    let Some(raw) = store
        .get(&config.accumulator_key)
        .with_context(|| format!("Failed to read {}", config.accumulator_key))?
    else {
        return Ok(Vec::new());
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => {
            warn!(
                kind = %config.name,
                key = %config.accumulator_key,
                "Stored data is not an array; starting over"
            );
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(
                kind = %config.name,
                key = %config.accumulator_key,
                error = %e,
                "Error parsing stored data; starting over"
            );
            Ok(Vec::new())
        }
    }
}

/// Current pagination state of a kind as JSON:
/// `{"kind", "accumulator_key", "cursor_key", "count", "cursor", "items"}`.
pub fn snapshot(store: &dyn EnvironmentStore, config: &ResourceConfig) -> Result<Value> {
    let items = load_items(store, config)?;
    let cursor = store
        .get(&config.cursor_key)
        .with_context(|| format!("Failed to read {}", config.cursor_key))?;
    Ok(json!({
        "kind": config.name,
        "accumulator_key": config.accumulator_key,
        "cursor_key": config.cursor_key,
        "count": items.len(),
        "cursor": cursor,
        "items": items,
    }))
}

/// Removes the accumulator and cursor for a kind.
pub fn clear(store: &dyn EnvironmentStore, config: &ResourceConfig) -> Result<()> {
    store
        .unset(&config.accumulator_key)
        .with_context(|| format!("Failed to unset {}", config.accumulator_key))?;
    store
        .unset(&config.cursor_key)
        .with_context(|| format!("Failed to unset {}", config.cursor_key))?;
    Ok(())
}

fn save(
    store: &dyn EnvironmentStore,
    config: &ResourceConfig,
    items: &[Value],
    cursor: Option<&str>,
) -> Result<()> {
    let serialized = serde_json::to_string(items).context("Failed to serialize items")?;
    store
        .set(&config.accumulator_key, &serialized)
        .with_context(|| format!("Failed to write {}", config.accumulator_key))?;
    if let Some(cursor) = cursor {
        store
            .set(&config.cursor_key, cursor)
            .with_context(|| format!("Failed to write {}", config.cursor_key))?;
    }
    Ok(())
}

/// Appends `page` to `items`, returning how many were added.
///
/// With `dedupe_by`, an item is skipped when its value for that field was
/// already seen. Items missing the field are always kept.
fn append(items: &mut Vec<Value>, page: Vec<Value>, dedupe_by: Option<&str>) -> usize {
    let Some(field) = dedupe_by else {
        let added = page.len();
        items.extend(page);
        return added;
    };

    let mut seen: HashSet<String> = items
        .iter()
        .filter_map(|item| item.get(field))
        .map(Value::to_string)
        .collect();

    let before = items.len();
    for item in page {
        if let Some(id) = item.get(field).map(Value::to_string) {
            if !seen.insert(id) {
                continue;
            }
        }
        items.push(item);
    }
    items.len() - before
}

fn store_failure(config: &ResourceConfig, err: anyhow::Error) -> Outcome {
    error!(kind = %config.name, error = %format!("{:#}", err), "Environment store failure");
    Outcome::StoreFailure(format!("{:#}", err))
}
