//! Quota-aware publishing with rate-limit retry
//!
//! `PublishGateway` owns the posting client and the in-memory quota window.
//! Only rate-limit signals are retried; every other platform error is
//! reported back as `Failed` on the first attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{PlatformError, RowcastError};
use crate::platforms::Platform;
use crate::quota::{QuotaSnapshot, QuotaWindow};
use crate::types::{BackoffStrategy, PublishOutcome, QuotaPolicy};

/// Quota and retry knobs
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub quota_limit: u32,
    pub quota_window: Duration,
    pub quota_policy: QuotaPolicy,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub strategy: BackoffStrategy,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            quota_limit: config.quota.limit,
            quota_window: config.quota.window,
            quota_policy: config.quota.policy,
            max_attempts: config.retry.max_attempts,
            backoff: config.retry.backoff,
            strategy: config.retry.strategy,
        }
    }

    /// Delay before retry number `attempt + 1`
    ///
    /// A `retry_after` reported by the platform replaces the computed delay.
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        match self.strategy {
            BackoffStrategy::Fixed => self.backoff,
            BackoffStrategy::Exponential => {
                let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
                self.backoff.saturating_mul(factor)
            }
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            quota_limit: 50,
            quota_window: Duration::from_secs(24 * 3600),
            quota_policy: QuotaPolicy::Wait,
            max_attempts: 5,
            backoff: Duration::from_secs(15 * 60),
            strategy: BackoffStrategy::Fixed,
        }
    }
}

fn rate_limit_hint(error: &RowcastError) -> Option<Option<Duration>> {
    match error {
        RowcastError::Platform(PlatformError::RateLimited { retry_after, .. }) => Some(*retry_after),
        _ => None,
    }
}

pub struct PublishGateway {
    platform: Box<dyn Platform>,
    clock: Arc<dyn Clock>,
    quota: QuotaWindow,
    settings: GatewaySettings,
}

impl PublishGateway {
    pub fn new(platform: Box<dyn Platform>, clock: Arc<dyn Clock>, settings: GatewaySettings) -> Self {
        let quota = QuotaWindow::new(settings.quota_window, clock.now());
        Self {
            platform,
            clock,
            quota,
            settings,
        }
    }

    /// Replace the quota window with persisted state
    pub fn restore_quota(&mut self, snapshot: QuotaSnapshot) {
        self.quota = QuotaWindow::restore(snapshot, self.settings.quota_window, self.clock.now());
        debug!(
            count = self.quota.count(),
            window_start = %self.quota.window_start(),
            "Restored quota window"
        );
    }

    pub fn quota_snapshot(&self) -> QuotaSnapshot {
        self.quota.snapshot()
    }

    pub fn quota(&self) -> &QuotaWindow {
        &self.quota
    }

    pub fn platform_name(&self) -> &str {
        self.platform.name()
    }

    /// Publish one segment
    ///
    /// Never truncates: content over the platform limit comes back as `Failed`.
    pub async fn publish(&mut self, segment: &str) -> PublishOutcome {
        let limit = self.settings.quota_limit;

        while !self.quota.has_capacity(limit, self.clock.now()) {
            let now = self.clock.now();
            let resets_at = self.quota.resets_at(now);

            match self.settings.quota_policy {
                QuotaPolicy::Reject => {
                    info!(
                        count = self.quota.count(),
                        limit,
                        resets_at = %resets_at,
                        "Posting quota reached; rejecting segment"
                    );
                    return PublishOutcome::QuotaExceeded { resets_at };
                }
                QuotaPolicy::Wait => {
                    let wait = self.quota.remaining(now);
                    warn!(
                        count = self.quota.count(),
                        limit,
                        wait = %humantime::format_duration(wait),
                        resets_at = %resets_at,
                        "Posting quota reached; waiting for window reset"
                    );
                    self.clock.sleep(wait).await;
                }
            }
        }

        if let Err(e) = self.platform.validate_content(segment) {
            warn!(platform = self.platform.name(), error = %e, outcome = "invalid", "Segment rejected before sending");
            return PublishOutcome::Failed {
                reason: e.to_string(),
            };
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.platform.post(segment).await {
                Ok(post_id) => {
                    self.quota.record(self.clock.now());
                    debug!(
                        platform = self.platform.name(),
                        attempt,
                        max_attempts,
                        outcome = "published",
                        post_id = %post_id,
                        quota_count = self.quota.count(),
                        "Segment published"
                    );
                    return PublishOutcome::Published {
                        post_id,
                        attempts: attempt,
                    };
                }
                Err(e) => match rate_limit_hint(&e) {
                    Some(retry_after) if attempt < max_attempts => {
                        let delay = self.settings.backoff_delay(attempt, retry_after);
                        warn!(
                            platform = self.platform.name(),
                            attempt,
                            max_attempts,
                            outcome = "rate_limited",
                            delay = %humantime::format_duration(delay),
                            "Rate limited; backing off before retry"
                        );
                        self.clock.sleep(delay).await;
                        last_error = e.to_string();
                    }
                    Some(_) => {
                        warn!(
                            platform = self.platform.name(),
                            attempt,
                            max_attempts,
                            outcome = "rate_limited",
                            "Rate limited; retry attempts exhausted"
                        );
                        return PublishOutcome::Failed {
                            reason: format!("{} (after {} attempts)", e, max_attempts),
                        };
                    }
                    None => {
                        warn!(
                            platform = self.platform.name(),
                            attempt,
                            max_attempts,
                            outcome = "failed",
                            error = %e,
                            "Publish failed"
                        );
                        return PublishOutcome::Failed {
                            reason: e.to_string(),
                        };
                    }
                },
            }
        }

        PublishOutcome::Failed { reason: last_error }
    }
}
