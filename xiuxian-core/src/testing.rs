//! Testing utilities.
//!
//! `MockCompleter` stands in for the completion endpoint so the whole
//! turn pipeline — context assembly, repair parsing, reconciliation,
//! compaction — runs deterministically with no network. `TestHarness`
//! wires one into a `GameSession` and keeps a handle for scripting.

use crate::memory::TurnEntry;
use crate::session::{Completer, GameSession, SessionConfig};
use async_trait::async_trait;
use openai_chat::{Error as ChatError, Request};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A scripted reply from the mock endpoint.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Raw assistant text, exactly as a real endpoint would return it.
    Text(String),
    /// A transport failure with the given message.
    Fail(String),
}

/// A mock completion endpoint returning scripted replies in order.
#[derive(Default)]
pub struct MockCompleter {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<Request>>,
}

impl MockCompleter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a raw-text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock state poisoned")
            .push_back(MockReply::Text(text.into()));
    }

    /// Queue a transport failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock state poisoned")
            .push_back(MockReply::Fail(message.into()));
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("mock state poisoned").len()
    }

    /// The most recent request, for asserting on assembled context.
    pub fn last_request(&self) -> Option<Request> {
        self.requests
            .lock()
            .expect("mock state poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl Completer for Arc<MockCompleter> {
    async fn complete(&self, request: Request) -> Result<String, ChatError> {
        self.requests
            .lock()
            .expect("mock state poisoned")
            .push(request);

        let reply = self
            .replies
            .lock()
            .expect("mock state poisoned")
            .pop_front();

        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(message)) => Err(ChatError::Network(message)),
            None => Ok("（天道静默，四野无声，无事发生。）".to_string()),
        }
    }
}

/// A game session wired to a scripted endpoint.
pub struct TestHarness {
    pub session: GameSession,
    pub endpoint: Arc<MockCompleter>,
}

impl TestHarness {
    /// Create a harness with default session configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::new())
    }

    /// Create a harness with a custom session configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        let endpoint = MockCompleter::new();
        let session = GameSession::with_completer(Box::new(endpoint.clone()), config);
        Self { session, endpoint }
    }

    /// Queue a raw-text reply on the endpoint.
    pub fn expect_reply(&self, text: impl Into<String>) -> &Self {
        self.endpoint.push_text(text);
        self
    }

    /// Queue a transport failure on the endpoint.
    pub fn expect_failure(&self, message: impl Into<String>) -> &Self {
        self.endpoint.push_failure(message);
        self
    }

    /// The last turn log entry.
    pub fn last_entry(&self) -> Option<&TurnEntry> {
        self.session.turn_log().last()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert the last log entry has the given role and contains the text.
#[track_caller]
pub fn assert_last_entry_contains(harness: &TestHarness, role: crate::memory::TurnRole, text: &str) {
    let entry = harness.last_entry().expect("turn log is empty");
    assert_eq!(entry.role, role, "unexpected role for entry: {entry:?}");
    assert!(
        entry.content.contains(text),
        "expected last entry to contain '{text}', got '{}'",
        entry.content
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TurnRole;

    #[tokio::test]
    async fn test_mock_replies_in_order() {
        let mock = MockCompleter::new();
        mock.push_text("第一回");
        mock.push_text("第二回");

        let request = Request::new(vec![]);
        assert_eq!(mock.complete(request.clone()).await.expect("reply"), "第一回");
        assert_eq!(mock.complete(request.clone()).await.expect("reply"), "第二回");
        // Exhausted: a canned quiet turn comes back instead of an error.
        assert!(mock.complete(request).await.expect("reply").contains("无事发生"));
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let mock = MockCompleter::new();
        mock.push_failure("connection refused");

        let result = mock.complete(Request::new(vec![])).await;
        assert!(matches!(result, Err(ChatError::Network(_))));
    }

    #[tokio::test]
    async fn test_harness_runs_a_scripted_turn() {
        let mut harness = TestHarness::new();
        harness.expect_reply(r#"{"narrative":"山雨欲来。","choices":["避雨"],"gameOver":false}"#);

        harness.session.submit_action("登山").await;
        assert_last_entry_contains(&harness, TurnRole::Narrator, "山雨欲来");
    }
}
