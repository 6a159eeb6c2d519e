//! Dry-run platform
//!
//! Writes each post to an output stream (stdout by default) instead of
//! sending it anywhere. Useful for checking a new source table and its
//! segmentation before pointing the pipeline at a real account.

use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;

pub struct DryRunPlatform {
    out: Mutex<Box<dyn Write + Send>>,
    sequence: AtomicU64,
}

impl DryRunPlatform {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

#[async_trait]
impl Platform for DryRunPlatform {
    async fn authenticate(&mut self) -> Result<()> {
        Ok(())
    }

    async fn post(&self, content: &str) -> Result<String> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let mut out = self
            .out
            .lock()
            .map_err(|_| PlatformError::Posting("dry-run output lock poisoned".to_string()))?;
        writeln!(out, "{}", content)
            .and_then(|_| out.flush())
            .map_err(|e| PlatformError::Posting(format!("Failed to write dry-run post: {}", e)))?;

        Ok(format!("dry-run-{}", id))
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }

    fn character_limit(&self) -> Option<usize> {
        None
    }
}
