//! Mock platform implementation for testing
//!
//! This module provides a scriptable mock platform that can simulate successes,
//! rate limiting, and failures on a per-call basis. It's designed for use in
//! integration tests to verify gateway and pipeline behavior without requiring
//! platform credentials or network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;

/// Scripted response for a single `post` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    Success,
    RateLimited(Option<Duration>),
    Fail(String),
}

/// Shared view into what a mock platform has seen
///
/// Cloned out of the mock before it is boxed, so tests can keep inspecting it
/// after ownership moves into a gateway.
#[derive(Debug, Clone, Default)]
pub struct MockRecorder {
    auth_calls: Arc<Mutex<usize>>,
    post_calls: Arc<Mutex<usize>>,
    posted: Arc<Mutex<Vec<String>>>,
    attempted: Arc<Mutex<Vec<String>>>,
}

impl MockRecorder {
    /// Get the number of times authenticate was called
    pub fn auth_call_count(&self) -> usize {
        *self.auth_calls.lock().unwrap()
    }

    /// Get the number of times post was called
    pub fn post_call_count(&self) -> usize {
        *self.post_calls.lock().unwrap()
    }

    /// Content that was accepted, in order
    pub fn posted_content(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }

    /// Content of every post call, including rejected ones
    pub fn attempted_content(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }
}

/// Mock platform for testing
pub struct MockPlatform {
    name: String,
    auth_error: Option<String>,
    character_limit: Option<usize>,
    script: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    recorder: MockRecorder,
    authenticated: bool,
}

impl MockPlatform {
    fn base(name: &str, fallback: MockResponse) -> Self {
        Self {
            name: name.to_string(),
            auth_error: None,
            character_limit: None,
            script: Mutex::new(VecDeque::new()),
            fallback,
            recorder: MockRecorder::default(),
            authenticated: true,
        }
    }

    /// Create a mock platform that always succeeds
    pub fn success(name: &str) -> Self {
        Self::base(name, MockResponse::Success)
    }

    /// Create a mock platform whose every post fails
    pub fn post_failure(name: &str, error: &str) -> Self {
        Self::base(name, MockResponse::Fail(error.to_string()))
    }

    /// Create a mock platform that always reports rate limiting
    pub fn always_rate_limited(name: &str) -> Self {
        Self::base(name, MockResponse::RateLimited(None))
    }

    /// Create a mock platform that plays `responses` in order, then succeeds
    pub fn scripted(name: &str, responses: Vec<MockResponse>) -> Self {
        let platform = Self::success(name);
        *platform.script.lock().unwrap() = responses.into();
        platform
    }

    /// Create a mock platform that fails authentication
    pub fn auth_failure(name: &str, error: &str) -> Self {
        let mut platform = Self::success(name);
        platform.auth_error = Some(error.to_string());
        platform.authenticated = false;
        platform
    }

    /// Set a character limit enforced by `validate_content`
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.character_limit = Some(limit);
        self
    }

    /// Handle for inspecting calls after the platform has been moved
    pub fn recorder(&self) -> MockRecorder {
        self.recorder.clone()
    }

    /// Get the number of times post was called
    pub fn post_call_count(&self) -> usize {
        self.recorder.post_call_count()
    }

    /// Get all content that was posted
    pub fn posted_content(&self) -> Vec<String> {
        self.recorder.posted_content()
    }

    fn next_response(&self) -> MockResponse {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn authenticate(&mut self) -> Result<()> {
        *self.recorder.auth_calls.lock().unwrap() += 1;

        match &self.auth_error {
            Some(error) => Err(PlatformError::Authentication(error.clone()).into()),
            None => {
                self.authenticated = true;
                Ok(())
            }
        }
    }

    async fn post(&self, content: &str) -> Result<String> {
        *self.recorder.post_calls.lock().unwrap() += 1;
        self.recorder.attempted.lock().unwrap().push(content.to_string());

        if !self.authenticated {
            return Err(PlatformError::Authentication("Not authenticated".to_string()).into());
        }

        match self.next_response() {
            MockResponse::Success => {
                self.recorder.posted.lock().unwrap().push(content.to_string());
                Ok(format!("{}:mock-{}", self.name, uuid::Uuid::new_v4()))
            }
            MockResponse::RateLimited(retry_after) => Err(PlatformError::RateLimited {
                detail: "Mock rate limit".to_string(),
                retry_after,
            }
            .into()),
            MockResponse::Fail(error) => Err(PlatformError::Posting(error).into()),
        }
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        if let Some(limit) = self.character_limit {
            let count = content.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {} character limit (got {} characters)",
                    limit, count
                ))
                .into());
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.character_limit
    }
}
