//! Resource kinds and the environment keys each one accumulates under.
//!
//! Every paginated endpoint is handled by the same accumulator; what differs
//! per endpoint is captured in a [`ResourceConfig`]:
//!
//! | Kind                 | Items from    | Accumulator     | Cursor           |
//! |----------------------|---------------|-----------------|------------------|
//! | `posts`              | bare array    | `allPosts`      | `lastPostId`     |
//! | `feed`               | `posts`       | `allFeedPosts`  | `lastSeenPostId` |
//! | `post-like-users`    | `like_users`  | `allLikeUsers`  | `lastLikeUserId` |
//! | `comments`           | `comments`    | `allComments`   | `lastCommentId`  |
//! | `comment-like-users` | `like_users`  | `allLikeUsers`  | `lastLikeUserId` |
//!
//! The two like-user kinds share their keys under [`KeyScheme::Shared`], so
//! only one of those paginations may be in flight at a time.
//! [`KeyScheme::Namespaced`] gives each its own pair of keys.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod registry;

pub use registry::ResourceRegistry;

/// Where a page's items live inside the envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ArrayField {
    /// The body itself is the array.
    #[default]
    Envelope,
    /// The array sits under this top-level field.
    Named(String),
}

impl From<Option<String>> for ArrayField {
    fn from(field: Option<String>) -> Self {
        match field {
            Some(name) if !name.is_empty() => ArrayField::Named(name),
            _ => ArrayField::Envelope,
        }
    }
}

impl From<ArrayField> for Option<String> {
    fn from(field: ArrayField) -> Self {
        match field {
            ArrayField::Envelope => None,
            ArrayField::Named(name) => Some(name),
        }
    }
}

/// Where the next cursor comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorSource {
    /// The envelope's `next_cursor` field.
    #[default]
    NextCursor,
    /// The `id` of the last item on the page.
    LastItemId,
}

/// How like-user kinds map onto environment keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// `allLikeUsers` / `lastLikeUserId` for both post and comment like-users.
    #[default]
    Shared,
    /// Separate keys per like-user kind.
    Namespaced,
}

impl FromStr for KeyScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shared" => Ok(KeyScheme::Shared),
            "namespaced" => Ok(KeyScheme::Namespaced),
            other => Err(anyhow!(
                "unknown key scheme '{}' (expected 'shared' or 'namespaced')",
                other
            )),
        }
    }
}

/// Per-kind accumulation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Kind name used on the command line (e.g. "feed")
    pub name: String,

    /// Human-readable resource name used in log lines (e.g. "user feed")
    pub label: String,

    /// Location of the page's items; omitted means bare-array mode
    #[serde(default)]
    pub array_field: ArrayField,

    /// Environment key holding the serialized item list
    pub accumulator_key: String,

    /// Environment key holding the last cursor
    pub cursor_key: String,

    #[serde(default)]
    pub cursor_source: CursorSource,

    /// Item field used to skip already-accumulated items. Unset keeps every item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_by: Option<String>,
}

impl ResourceConfig {
    fn builtin(
        name: &str,
        label: &str,
        array_field: ArrayField,
        accumulator_key: &str,
        cursor_key: &str,
        cursor_source: CursorSource,
    ) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            array_field,
            accumulator_key: accumulator_key.to_string(),
            cursor_key: cursor_key.to_string(),
            cursor_source,
            dedupe_by: None,
        }
    }
}

/// The built-in paginated endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Posts,
    Feed,
    PostLikeUsers,
    Comments,
    CommentLikeUsers,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Posts,
        ResourceKind::Feed,
        ResourceKind::PostLikeUsers,
        ResourceKind::Comments,
        ResourceKind::CommentLikeUsers,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Posts => "posts",
            ResourceKind::Feed => "feed",
            ResourceKind::PostLikeUsers => "post-like-users",
            ResourceKind::Comments => "comments",
            ResourceKind::CommentLikeUsers => "comment-like-users",
        }
    }

    /// Default configuration for this kind under the given key scheme.
    pub fn config(&self, scheme: KeyScheme) -> ResourceConfig {
        let named = |field: &str| ArrayField::Named(field.to_string());
        match self {
            ResourceKind::Posts => ResourceConfig::builtin(
                self.name(),
                "user posts",
                ArrayField::Envelope,
                "allPosts",
                "lastPostId",
                CursorSource::LastItemId,
            ),
            ResourceKind::Feed => ResourceConfig::builtin(
                self.name(),
                "user feed",
                named("posts"),
                "allFeedPosts",
                "lastSeenPostId",
                CursorSource::NextCursor,
            ),
            ResourceKind::Comments => ResourceConfig::builtin(
                self.name(),
                "comments",
                named("comments"),
                "allComments",
                "lastCommentId",
                CursorSource::NextCursor,
            ),
            ResourceKind::PostLikeUsers => {
                let (acc, cursor) = match scheme {
                    KeyScheme::Shared => ("allLikeUsers", "lastLikeUserId"),
                    KeyScheme::Namespaced => ("allPostLikeUsers", "lastPostLikeUserId"),
                };
                ResourceConfig::builtin(
                    self.name(),
                    "post like users",
                    named("like_users"),
                    acc,
                    cursor,
                    CursorSource::NextCursor,
                )
            }
            ResourceKind::CommentLikeUsers => {
                let (acc, cursor) = match scheme {
                    KeyScheme::Shared => ("allLikeUsers", "lastLikeUserId"),
                    KeyScheme::Namespaced => ("allCommentLikeUsers", "lastCommentLikeUserId"),
                };
                ResourceConfig::builtin(
                    self.name(),
                    "comment like users",
                    named("like_users"),
                    acc,
                    cursor,
                    CursorSource::NextCursor,
                )
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| anyhow!("unknown resource kind '{}'", s))
    }
}
