use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use std::path::Path;

mod extract;

pub use extract::{extract_page, Page, PageError};

/// The only status code treated as a successful page response.
pub const HTTP_OK: u16 = 200;

/// `info` value the API sends once a pagination is exhausted.
pub const DONE_INFO: &str = "Done";

/// Fallback used when an error response carries no usable `detail`.
pub const NO_DETAIL: &str = "No detail provided";

/// One completed HTTP exchange as handed over by the request-runner.
///
/// The body is kept as an arbitrary JSON value: depending on the endpoint it
/// is an object (`{"posts": [...], "next_cursor": ...}`), a bare array, or a
/// plain string when the server answered with something that is not JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// HTTP status code (e.g. 200, 401)
    pub status_code: u16,

    /// Reason phrase reported alongside the code (e.g. "OK", "Unauthorized")
    #[serde(default)]
    pub status_text: String,

    /// Response body
    pub body: Value,
}

/// Diagnostic record emitted for a non-200 response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// `"<code> <status text>"`
    pub status: String,
    pub detail: String,
}

/// What kind of response an envelope is, in the order the handler checks.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// Anything other than HTTP 200.
    TransportError(ErrorDetail),
    /// Body carries a fresh `access_token`; the request must be re-sent.
    TokenRefresh(String),
    /// Body carries a `message`; `done` is set when `info == "Done"`.
    Message { done: bool },
    /// Anything else is expected to be a page of items.
    Page,
}

impl ResponseEnvelope {
    pub fn new(status_code: u16, status_text: impl Into<String>, body: Value) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            body,
        }
    }

    /// A 200 OK envelope around `body`.
    pub fn ok(body: Value) -> Self {
        Self::new(HTTP_OK, "OK", body)
    }

    /// Builds an envelope from a raw response body.
    ///
    /// An empty body becomes `null`; a body that is not valid JSON is kept as a
    /// JSON string so later shape checks can report it instead of failing here.
    pub fn from_raw(status_code: u16, status_text: impl Into<String>, raw: &str) -> Self {
        let trimmed = raw.trim();
        let body = if trimmed.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Self::new(status_code, status_text, body)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == HTTP_OK
    }

    /// Looks up a top-level field of an object body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.as_object().and_then(|obj| obj.get(name))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// `info == "Done"` marks the end of a pagination.
    pub fn is_done(&self) -> bool {
        matches!(self.field("info"), Some(Value::String(info)) if info == DONE_INFO)
    }

    /// Builds the `{status, detail}` record logged for failed responses.
    pub fn error_detail(&self) -> ErrorDetail {
        let status = format!("{} {}", self.status_code, self.status_text)
            .trim_end()
            .to_string();
        let detail = match self.field("detail") {
            Some(value) if is_truthy(value) => to_env_text(value),
            _ => NO_DETAIL.to_string(),
        };
        ErrorDetail { status, detail }
    }

    pub fn classify(&self) -> Classification {
        if !self.is_success() {
            return Classification::TransportError(self.error_detail());
        }
        if let Some(token) = self.field("access_token") {
            return Classification::TokenRefresh(to_env_text(token));
        }
        if self.has_field("message") {
            return Classification::Message {
                done: self.is_done(),
            };
        }
        Classification::Page
    }
}

/// Renders a JSON value the way it is written into the environment.
///
/// Strings are stored as their raw text, everything else as compact JSON.
pub fn to_env_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads a raw response body from `path`, or from `stdin` when the path is
/// `-` or absent.
pub fn read_body<R: Read>(path: Option<&Path>, mut stdin: R) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read response body from {}", path.display())),
        _ => {
            let mut raw = String::new();
            stdin
                .read_to_string(&mut raw)
                .context("Failed to read response body from stdin")?;
            Ok(raw)
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
