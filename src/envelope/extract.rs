use super::{to_env_text, ResponseEnvelope};
use crate::resource::{ArrayField, CursorSource, ResourceConfig};
use serde_json::Value;
use std::fmt;

/// Field carrying the server-issued cursor in object envelopes.
pub const NEXT_CURSOR_FIELD: &str = "next_cursor";

/// Why a 200 response could not be read as a page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageError {
    /// Bare-array mode, but the body is not an array.
    NotAnArray,
    /// Named-field mode, field absent.
    MissingField(String),
    /// Named-field mode, field present but not an array.
    FieldNotArray(String),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::NotAnArray => write!(f, "response is not an array"),
            PageError::MissingField(field) => {
                write!(f, "response does not contain '{}'", field)
            }
            PageError::FieldNotArray(field) => {
                write!(f, "response field '{}' is not an array", field)
            }
        }
    }
}

impl std::error::Error for PageError {}

/// Items and cursor pulled out of one page response.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Text to store under the cursor key. `None` leaves the cursor untouched.
    pub cursor: Option<String>,
}

/// Reads the page items and next cursor from an envelope.
///
/// Rules:
/// - Bare-array mode: the body itself must be an array
/// - Named-field mode: the field must exist and hold an array
/// - `next_cursor` is passed through verbatim; absent or `null` is stored as `null`
/// - Last-item cursors use the `id` of the final item; an empty page (or an
///   item without `id`) yields no cursor update
pub fn extract_page(envelope: &ResponseEnvelope, config: &ResourceConfig) -> Result<Page, PageError> {
    let items = match &config.array_field {
        ArrayField::Envelope => match &envelope.body {
            Value::Array(items) => items.clone(),
            _ => return Err(PageError::NotAnArray),
        },
        ArrayField::Named(field) => match envelope.field(field) {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(PageError::FieldNotArray(field.clone())),
            None => return Err(PageError::MissingField(field.clone())),
        },
    };

    let cursor = match config.cursor_source {
        CursorSource::NextCursor => Some(
            envelope
                .field(NEXT_CURSOR_FIELD)
                .map(to_env_text)
                .unwrap_or_else(|| Value::Null.to_string()),
        ),
        CursorSource::LastItemId => items
            .last()
            .and_then(|item| item.get("id"))
            .map(to_env_text),
    };

    Ok(Page { items, cursor })
}
