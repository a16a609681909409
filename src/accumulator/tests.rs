use super::*;
use crate::resource::{KeyScheme, ResourceKind};
use crate::store::MemoryEnvironment;
use anyhow::anyhow;
use serde_json::json;

fn feed() -> ResourceConfig {
    ResourceKind::Feed.config(KeyScheme::Shared)
}

fn posts() -> ResourceConfig {
    ResourceKind::Posts.config(KeyScheme::Shared)
}

fn stored_items(env: &MemoryEnvironment, config: &ResourceConfig) -> Option<Value> {
    env.get(&config.accumulator_key)
        .unwrap()
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

fn stored_cursor(env: &MemoryEnvironment, config: &ResourceConfig) -> Option<String> {
    env.get(&config.cursor_key).unwrap()
}

/// Store whose writes always fail.
struct ReadOnlyEnvironment(MemoryEnvironment);

impl EnvironmentStore for ReadOnlyEnvironment {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.0.get(key)
    }
    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("read-only environment"))
    }
    fn unset(&self, _key: &str) -> Result<bool> {
        Err(anyhow!("read-only environment"))
    }
    fn keys(&self) -> Result<Vec<String>> {
        self.0.keys()
    }
}

// ── Transport errors ──────────────────────────────────────────────────────────

#[test]
fn test_transport_error_leaves_state_untouched() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", r#"[{"id":1}]"#), ("lastSeenPostId", "2")]);
    let envelope = ResponseEnvelope::new(500, "Internal Server Error", json!({"posts": [{"id": 9}]}));

    let outcome = handle_response(&envelope, &feed(), &env);

    match outcome {
        Outcome::TransportError(detail) => {
            assert_eq!(detail.status, "500 Internal Server Error");
            assert_eq!(detail.detail, "No detail provided");
        }
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(stored_items(&env, &feed()), Some(json!([{"id": 1}])));
    assert_eq!(stored_cursor(&env, &feed()).as_deref(), Some("2"));
}

// ── Token refresh ─────────────────────────────────────────────────────────────

#[test]
fn test_token_refresh_only_stores_token() {
    let env = MemoryEnvironment::with_vars([
        ("allFeedPosts", r#"[{"id":1}]"#),
        ("lastSeenPostId", "2"),
        ("JWT", "old-token"),
    ]);
    let envelope = ResponseEnvelope::ok(json!({"access_token": "new-token", "token_type": "bearer"}));

    assert_eq!(handle_response(&envelope, &feed(), &env), Outcome::TokenRefreshed);

    assert_eq!(env.get("JWT").unwrap().as_deref(), Some("new-token"));
    assert_eq!(stored_items(&env, &feed()), Some(json!([{"id": 1}])));
    assert_eq!(stored_cursor(&env, &feed()).as_deref(), Some("2"));
}

#[test]
fn test_token_refresh_with_empty_state() {
    let env = MemoryEnvironment::new();
    let envelope = ResponseEnvelope::ok(json!({"access_token": "t1"}));

    handle_response(&envelope, &posts(), &env);
    handle_response(&envelope, &posts(), &env);

    assert_eq!(env.keys().unwrap(), vec!["JWT"]);
}

#[test]
fn test_custom_credential_key() {
    let env = MemoryEnvironment::new();
    let handler = ResponseHandler::new(&env).with_credential_key("ACCESS_TOKEN");
    assert_eq!(handler.credential_key(), "ACCESS_TOKEN");

    handler.handle(&ResponseEnvelope::ok(json!({"access_token": "abc"})), &feed());

    assert_eq!(env.get("ACCESS_TOKEN").unwrap().as_deref(), Some("abc"));
    assert_eq!(env.get("JWT").unwrap(), None);
}

// ── Accumulation ──────────────────────────────────────────────────────────────

#[test]
fn test_pages_concatenate_in_order() {
    let env = MemoryEnvironment::new();
    let pages = [
        json!([{"id": 1}, {"id": 2}]),
        json!([{"id": 3}]),
        json!([{"id": 4}, {"id": 5}, {"id": 6}]),
    ];

    for page in &pages {
        handle_response(&ResponseEnvelope::ok(page.clone()), &posts(), &env);
    }

    assert_eq!(
        stored_items(&env, &posts()),
        Some(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}, {"id": 5}, {"id": 6}]))
    );
    assert_eq!(stored_cursor(&env, &posts()).as_deref(), Some("6"));
}

#[test]
fn test_duplicates_kept_without_dedupe() {
    let env = MemoryEnvironment::new();
    let envelope = ResponseEnvelope::ok(json!({"posts": [{"id": 1}], "next_cursor": 2}));

    handle_response(&envelope, &feed(), &env);
    let outcome = handle_response(&envelope, &feed(), &env);

    assert_eq!(
        outcome,
        Outcome::Accumulated {
            added: 1,
            total: 2,
            cursor: Some("2".to_string())
        }
    );
    assert_eq!(stored_items(&env, &feed()), Some(json!([{"id": 1}, {"id": 1}])));
}

#[test]
fn test_dedupe_by_id_skips_seen_items() {
    let env = MemoryEnvironment::new();
    let mut config = feed();
    config.dedupe_by = Some("id".to_string());

    handle_response(
        &ResponseEnvelope::ok(json!({"posts": [{"id": 1}, {"id": 2}], "next_cursor": 3})),
        &config,
        &env,
    );
    let outcome = handle_response(
        &ResponseEnvelope::ok(json!({"posts": [{"id": 2}, {"id": 3}, {"id": 3}, {"title": "no id"}], "next_cursor": 4})),
        &config,
        &env,
    );

    assert_eq!(
        outcome,
        Outcome::Accumulated {
            added: 2,
            total: 4,
            cursor: Some("4".to_string())
        }
    );
    assert_eq!(
        stored_items(&env, &config),
        Some(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"title": "no id"}]))
    );
}

#[test]
fn test_cursor_passthrough() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", r#"[{"id":"x"}]"#), ("lastSeenPostId", "old")]);
    let envelope = ResponseEnvelope::ok(json!({"posts": [{"id": "y"}], "next_cursor": "abc123"}));

    handle_response(&envelope, &feed(), &env);

    assert_eq!(stored_cursor(&env, &feed()).as_deref(), Some("abc123"));
}

#[test]
fn test_null_cursor_is_stored() {
    let env = MemoryEnvironment::new();
    let comments = ResourceKind::Comments.config(KeyScheme::Shared);
    let envelope = ResponseEnvelope::ok(json!({"comments": [{"id": 5}], "next_cursor": null}));

    handle_response(&envelope, &comments, &env);

    assert_eq!(env.get("lastCommentId").unwrap().as_deref(), Some("null"));
    assert_eq!(stored_items(&env, &comments), Some(json!([{"id": 5}])));
}

#[test]
fn test_empty_named_page_writes_empty_list() {
    let env = MemoryEnvironment::new();
    let outcome = handle_response(
        &ResponseEnvelope::ok(json!({"posts": [], "next_cursor": null})),
        &feed(),
        &env,
    );

    assert_eq!(
        outcome,
        Outcome::Accumulated {
            added: 0,
            total: 0,
            cursor: Some("null".to_string())
        }
    );
    assert_eq!(stored_items(&env, &feed()), Some(json!([])));
}

#[test]
fn test_empty_bare_array_page_keeps_cursor() {
    let env = MemoryEnvironment::with_vars([("allPosts", r#"[{"id":4}]"#), ("lastPostId", "4")]);

    let outcome = handle_response(&ResponseEnvelope::ok(json!([])), &posts(), &env);

    assert_eq!(
        outcome,
        Outcome::Accumulated {
            added: 0,
            total: 1,
            cursor: None
        }
    );
    assert_eq!(stored_cursor(&env, &posts()).as_deref(), Some("4"));
    assert_eq!(stored_items(&env, &posts()), Some(json!([{"id": 4}])));
}

// ── Corrupted state ───────────────────────────────────────────────────────────

#[test]
fn test_unparsable_accumulator_resets() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", "not json")]);
    let envelope = ResponseEnvelope::ok(json!({"posts": [{"id": 7}], "next_cursor": 8}));

    handle_response(&envelope, &feed(), &env);

    assert_eq!(stored_items(&env, &feed()), Some(json!([{"id": 7}])));
}

#[test]
fn test_non_array_accumulator_resets() {
    let env = MemoryEnvironment::with_vars([("allPosts", r#"{"id": 1}"#)]);

    handle_response(&ResponseEnvelope::ok(json!([{"id": 2}])), &posts(), &env);

    assert_eq!(stored_items(&env, &posts()), Some(json!([{"id": 2}])));
}

#[test]
fn test_load_items() {
    let env = MemoryEnvironment::with_vars([("allComments", "[1, 2]"), ("allFeedPosts", "42")]);

    let comments = ResourceKind::Comments.config(KeyScheme::Shared);
    assert_eq!(load_items(&env, &comments).unwrap(), vec![json!(1), json!(2)]);
    assert!(load_items(&env, &feed()).unwrap().is_empty());
    assert!(load_items(&env, &posts()).unwrap().is_empty());
}

// ── Malformed pages ───────────────────────────────────────────────────────────

#[test]
fn test_missing_array_field_rejected() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", r#"[{"id":1}]"#), ("lastSeenPostId", "2")]);

    let outcome = handle_response(&ResponseEnvelope::ok(json!({})), &feed(), &env);

    assert_eq!(
        outcome,
        Outcome::MalformedPage(PageError::MissingField("posts".to_string()))
    );
    assert_eq!(stored_items(&env, &feed()), Some(json!([{"id": 1}])));
    assert_eq!(stored_cursor(&env, &feed()).as_deref(), Some("2"));
}

#[test]
fn test_object_rejected_in_bare_array_mode() {
    let env = MemoryEnvironment::new();

    let outcome = handle_response(&ResponseEnvelope::ok(json!({"posts": []})), &posts(), &env);

    assert_eq!(outcome, Outcome::MalformedPage(PageError::NotAnArray));
    assert!(env.keys().unwrap().is_empty());
}

#[test]
fn test_malformed_page_does_not_reset_corrupt_state() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", "not json")]);

    handle_response(&ResponseEnvelope::ok(json!({"posts": "nope"})), &feed(), &env);

    assert_eq!(env.get("allFeedPosts").unwrap().as_deref(), Some("not json"));
}

// ── Messages and completion ───────────────────────────────────────────────────

#[test]
fn test_done_clears_non_empty_accumulator() {
    let env = MemoryEnvironment::with_vars([
        ("allFeedPosts", r#"[{"id":1},{"id":2}]"#),
        ("lastSeenPostId", "3"),
        ("JWT", "token"),
    ]);
    let envelope = ResponseEnvelope::ok(json!({"message": "No more posts", "info": "Done"}));

    let outcome = handle_response(&envelope, &feed(), &env);

    assert_eq!(
        outcome,
        Outcome::Completed {
            items: vec![json!({"id": 1}), json!({"id": 2})]
        }
    );
    assert_eq!(env.keys().unwrap(), vec!["JWT"]);
}

#[test]
fn test_done_with_empty_accumulator_changes_nothing() {
    let env = MemoryEnvironment::with_vars([("allComments", "[]"), ("lastCommentId", "null")]);
    let comments = ResourceKind::Comments.config(KeyScheme::Shared);
    let envelope = ResponseEnvelope::ok(json!({"message": "No more comments", "info": "Done"}));

    assert_eq!(handle_response(&envelope, &comments, &env), Outcome::Message);
    assert_eq!(env.keys().unwrap(), vec!["allComments", "lastCommentId"]);

    let fresh = MemoryEnvironment::new();
    assert_eq!(handle_response(&envelope, &comments, &fresh), Outcome::Message);
    assert!(fresh.keys().unwrap().is_empty());
}

#[test]
fn test_message_without_done_keeps_state() {
    let env = MemoryEnvironment::with_vars([("allPosts", r#"[{"id":1}]"#), ("lastPostId", "1")]);
    let envelope = ResponseEnvelope::ok(json!({"message": "User has no posts"}));

    assert_eq!(handle_response(&envelope, &posts(), &env), Outcome::Message);
    assert_eq!(stored_items(&env, &posts()), Some(json!([{"id": 1}])));
    assert_eq!(stored_cursor(&env, &posts()).as_deref(), Some("1"));
}

#[test]
fn test_done_with_corrupt_accumulator_is_a_plain_message() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", "{broken"), ("lastSeenPostId", "9")]);
    let envelope = ResponseEnvelope::ok(json!({"message": "done", "info": "Done"}));

    assert_eq!(handle_response(&envelope, &feed(), &env), Outcome::Message);
    assert_eq!(stored_cursor(&env, &feed()).as_deref(), Some("9"));
}

// ── Store failures ────────────────────────────────────────────────────────────

#[test]
fn test_store_failure_is_reported_not_raised() {
    let env = ReadOnlyEnvironment(MemoryEnvironment::new());

    let outcome = handle_response(&ResponseEnvelope::ok(json!([{"id": 1}])), &posts(), &env);
    match outcome {
        Outcome::StoreFailure(message) => assert!(message.contains("read-only")),
        other => panic!("expected store failure, got {:?}", other),
    }

    let outcome = handle_response(&ResponseEnvelope::ok(json!({"access_token": "t"})), &posts(), &env);
    assert!(matches!(outcome, Outcome::StoreFailure(_)));
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_feed_end_to_end() {
    let env = MemoryEnvironment::new();
    let config = feed();

    handle_response(
        &ResponseEnvelope::ok(json!({"posts": [{"id": 1}], "next_cursor": 2})),
        &config,
        &env,
    );
    handle_response(
        &ResponseEnvelope::ok(json!({"posts": [{"id": 2}], "next_cursor": 3})),
        &config,
        &env,
    );

    assert_eq!(stored_items(&env, &config), Some(json!([{"id": 1}, {"id": 2}])));
    assert_eq!(stored_cursor(&env, &config).as_deref(), Some("3"));

    let outcome = handle_response(
        &ResponseEnvelope::ok(json!({"message": "no more", "info": "Done"})),
        &config,
        &env,
    );

    assert_eq!(
        outcome,
        Outcome::Completed {
            items: vec![json!({"id": 1}), json!({"id": 2})]
        }
    );
    assert_eq!(env.get("allFeedPosts").unwrap(), None);
    assert_eq!(env.get("lastSeenPostId").unwrap(), None);
}

#[test]
fn test_shared_like_user_keys_collide() {
    let env = MemoryEnvironment::new();
    let post_likes = ResourceKind::PostLikeUsers.config(KeyScheme::Shared);
    let comment_likes = ResourceKind::CommentLikeUsers.config(KeyScheme::Shared);

    handle_response(
        &ResponseEnvelope::ok(json!({"like_users": [{"id": "p1"}], "next_cursor": "p1"})),
        &post_likes,
        &env,
    );
    handle_response(
        &ResponseEnvelope::ok(json!({"like_users": [{"id": "c1"}], "next_cursor": "c1"})),
        &comment_likes,
        &env,
    );

    assert_eq!(
        stored_items(&env, &post_likes),
        Some(json!([{"id": "p1"}, {"id": "c1"}]))
    );
}

#[test]
fn test_namespaced_like_user_keys_are_independent() {
    let env = MemoryEnvironment::new();
    let post_likes = ResourceKind::PostLikeUsers.config(KeyScheme::Namespaced);
    let comment_likes = ResourceKind::CommentLikeUsers.config(KeyScheme::Namespaced);

    handle_response(
        &ResponseEnvelope::ok(json!({"like_users": [{"id": "p1"}], "next_cursor": "p1"})),
        &post_likes,
        &env,
    );
    handle_response(
        &ResponseEnvelope::ok(json!({"like_users": [{"id": "c1"}], "next_cursor": "c1"})),
        &comment_likes,
        &env,
    );

    assert_eq!(stored_items(&env, &post_likes), Some(json!([{"id": "p1"}])));
    assert_eq!(stored_items(&env, &comment_likes), Some(json!([{"id": "c1"}])));

    // Finishing one pagination leaves the other in place
    handle_response(
        &ResponseEnvelope::ok(json!({"message": "No more users who liked available", "info": "Done"})),
        &post_likes,
        &env,
    );
    assert_eq!(stored_items(&env, &post_likes), None);
    assert_eq!(stored_cursor(&env, &comment_likes).as_deref(), Some("c1"));
}

#[test]
fn test_clear() {
    let env = MemoryEnvironment::with_vars([("allPosts", "[]"), ("lastPostId", "1"), ("JWT", "t")]);
    clear(&env, &posts()).unwrap();
    assert_eq!(env.keys().unwrap(), vec!["JWT"]);
}

#[test]
fn test_snapshot() {
    let env = MemoryEnvironment::with_vars([("allFeedPosts", r#"[{"id":1}]"#), ("lastSeenPostId", "2")]);

    let snap = snapshot(&env, &feed()).unwrap();
    assert_eq!(snap["kind"], json!("feed"));
    assert_eq!(snap["count"], json!(1));
    assert_eq!(snap["cursor"], json!("2"));
    assert_eq!(snap["items"], json!([{"id": 1}]));

    let empty = snapshot(&MemoryEnvironment::new(), &posts()).unwrap();
    assert_eq!(empty["count"], json!(0));
    assert!(empty["cursor"].is_null());
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Shared buffer the fmt subscriber writes into.
#[derive(Clone, Default)]
struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with a subscriber capturing every line it logs.
fn captured_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn test_missing_array_field_logs_one_error() {
    let env = MemoryEnvironment::new();

    let logs = captured_logs(|| {
        handle_response(&ResponseEnvelope::ok(json!({})), &feed(), &env);
    });

    let errors: Vec<&str> = logs.lines().filter(|line| line.contains(" ERROR ")).collect();
    assert_eq!(errors.len(), 1, "logs: {}", logs);
    assert!(errors[0].contains("Unexpected user feed response"));
    assert!(errors[0].contains("posts"));
}

#[test]
fn test_feed_completion_logged_once() {
    let env = MemoryEnvironment::new();
    let config = feed();

    let logs = captured_logs(|| {
        handle_response(
            &ResponseEnvelope::ok(json!({"posts": [{"id": 1}], "next_cursor": 2})),
            &config,
            &env,
        );
        handle_response(
            &ResponseEnvelope::ok(json!({"posts": [{"id": 2}], "next_cursor": 3})),
            &config,
            &env,
        );
        handle_response(
            &ResponseEnvelope::ok(json!({"message": "no more", "info": "Done"})),
            &config,
            &env,
        );
    });

    let collected: Vec<&str> = logs
        .lines()
        .filter(|line| line.contains("All user feed collected"))
        .collect();
    assert_eq!(collected.len(), 1, "logs: {}", logs);
    assert!(collected[0].contains(r#"[{"id":1},{"id":2}]"#));
    assert!(!logs.contains(" ERROR "));
}

#[test]
fn test_transport_error_logs_status_and_detail() {
    let env = MemoryEnvironment::new();
    let envelope = ResponseEnvelope::new(401, "Unauthorized", json!({"detail": "Token expired"}));

    let logs = captured_logs(|| {
        handle_response(&envelope, &feed(), &env);
    });

    let errors: Vec<&str> = logs.lines().filter(|line| line.contains(" ERROR ")).collect();
    assert_eq!(errors.len(), 1, "logs: {}", logs);
    assert!(errors[0].contains("Error fetching user feed"));
    assert!(errors[0].contains("401 Unauthorized"));
    assert!(errors[0].contains("Token expired"));
}
