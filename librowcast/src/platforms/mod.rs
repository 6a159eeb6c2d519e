//! Posting capability abstraction and implementations
//!
//! A platform is anything that can take a finished segment of text and turn
//! it into a post. The gateway only ever talks to the `Platform` trait; the
//! concrete client is built once at startup and injected.
//!
//! # Examples
//!
//! ```no_run
//! use librowcast::platforms::{mock::MockPlatform, Platform};
//!
//! # async fn example() -> librowcast::Result<()> {
//! let mut platform = MockPlatform::success("mock");
//! platform.authenticate().await?;
//!
//! let post_id = platform.post("New entry added: hello world").await?;
//! println!("Posted: {}", post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::config::{Config, PlatformKind};
use crate::error::{ConfigError, Result};

pub mod dry_run;
pub mod mastodon;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Platform trait for the external posting capability
#[async_trait]
pub trait Platform: Send + Sync {
    /// Verify credentials and connectivity
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` if the credentials are rejected
    /// or `PlatformError::Network` if the platform cannot be reached.
    async fn authenticate(&mut self) -> Result<()>;

    /// Publish one segment and return the platform-specific post ID
    ///
    /// # Errors
    ///
    /// - `PlatformError::RateLimited` when the platform asks us to slow down
    /// - `PlatformError::Validation` when the content is rejected
    /// - `PlatformError::Authentication`, `Posting` or `Network` otherwise
    async fn post(&self, content: &str) -> Result<String>;

    /// Check content against platform rules without sending it
    fn validate_content(&self, content: &str) -> Result<()>;

    /// Lowercase platform identifier (e.g., "mastodon")
    fn name(&self) -> &str;

    /// Maximum characters per post, if the platform has a hard limit
    fn character_limit(&self) -> Option<usize>;
}

/// Build the configured posting client
///
/// The returned platform is not yet authenticated.
///
/// # Errors
///
/// Returns a configuration error if the platform section is incomplete or
/// its credentials cannot be read.
pub fn create_platform(config: &Config) -> Result<Box<dyn Platform>> {
    match config.platform.kind {
        PlatformKind::Mastodon => {
            let client = mastodon::MastodonClient::from_config(&config.platform)?;
            tracing::info!(instance = %client.instance_url(), "Created Mastodon platform client");
            Ok(Box::new(client))
        }
        PlatformKind::DryRun => {
            tracing::info!("Created dry-run platform; posts are written to stdout");
            Ok(Box::new(dry_run::DryRunPlatform::stdout()))
        }
    }
}

pub(crate) fn missing(field: &str) -> crate::error::RowcastError {
    ConfigError::MissingField(field.to_string()).into()
}
