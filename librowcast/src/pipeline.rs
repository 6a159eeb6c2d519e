//! Incremental publish pipeline
//!
//! One run: load the cursor, fetch unseen rows, and publish each row's
//! segments in order. The cursor moves past a row only after every one of
//! its segments was published, so a failure mid-row means the whole row is
//! published again on the next run.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::gateway::PublishGateway;
use crate::normalize::TextNormalizer;
use crate::platforms::Platform;
use crate::progress::ProgressStore;
use crate::segment::TextSegmenter;
use crate::source::RowSource;
use crate::types::{PublishOutcome, RunReport, StopReason};

/// Per-row text handling and pacing
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub normalizer: TextNormalizer,
    pub segmenter: TextSegmenter,
    /// Prepended once to each row's normalized text
    pub prefix: String,
    pub segment_delay: Duration,
    pub persist_quota: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            normalizer: TextNormalizer::new(config.publish.normalization, &config.source.charset)?,
            segmenter: TextSegmenter::new(config.publish.max_segment_length)?,
            prefix: config.publish.prefix.clone(),
            segment_delay: config.publish.segment_delay,
            persist_quota: config.quota.persist,
        })
    }

    /// Make sure a full-length segment can be posted on `platform`
    ///
    /// Call after authenticating, since some platforms only learn their
    /// limit from the server.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `publish.max_segment_length`
    /// exceeds the platform's character limit; every long row would fail
    /// validation and hold the cursor back forever.
    pub fn check_platform_limit(&self, platform: &dyn Platform) -> Result<()> {
        let max_len = self.segmenter.max_len();
        match platform.character_limit() {
            Some(limit) if max_len > limit => Err(ConfigError::invalid(
                "publish.max_segment_length",
                format!(
                    "{} exceeds the {} limit of {} characters",
                    max_len,
                    platform.name(),
                    limit
                ),
            )
            .into()),
            _ => Ok(()),
        }
    }

    /// Normalized, framed and segmented text for one row
    pub fn prepare(&self, normalized: &str) -> Vec<String> {
        if normalized.is_empty() {
            return Vec::new();
        }
        self.segmenter
            .segment(&format!("{}{}", self.prefix, normalized))
    }
}

pub struct PublishPipeline {
    source: Arc<dyn RowSource>,
    store: Arc<dyn ProgressStore>,
    gateway: PublishGateway,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    quota_restored: bool,
}

impl PublishPipeline {
    pub fn new(
        source: Arc<dyn RowSource>,
        store: Arc<dyn ProgressStore>,
        gateway: PublishGateway,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            gateway,
            clock,
            settings,
            quota_restored: false,
        }
    }

    pub fn gateway(&self) -> &PublishGateway {
        &self.gateway
    }

    async fn restore_quota_once(&mut self) -> Result<()> {
        if self.quota_restored || !self.settings.persist_quota {
            return Ok(());
        }
        if let Some(snapshot) = self.store.load_quota().await? {
            self.gateway.restore_quota(snapshot);
        }
        self.quota_restored = true;
        Ok(())
    }

    /// Publish every unseen row, stopping at the first row that cannot be
    /// fully published
    ///
    /// Row-level failures are reported in the returned `RunReport`.
    ///
    /// # Errors
    ///
    /// Source and progress store errors abort the run; the cursor keeps the
    /// last value that was saved.
    pub async fn run_once(&mut self) -> Result<RunReport> {
        self.restore_quota_once().await?;

        let cursor = self.store.load().await?;
        let mut report = RunReport::starting_at(cursor);

        let rows = self.source.fetch_rows_after(cursor).await?;
        report.rows_fetched = rows.len();

        if rows.is_empty() {
            info!(cursor, "No new entries to publish");
            return Ok(report);
        }

        info!(cursor, rows = rows.len(), "Found new entries");
        let mut published_any = false;

        for row in rows {
            if row.id <= report.cursor_after {
                warn!(
                    row_id = row.id,
                    cursor = report.cursor_after,
                    "Ignoring row at or below the cursor"
                );
                continue;
            }

            let text = self.settings.normalizer.normalize(&row.text);
            let segments = self.settings.prepare(&text);

            if segments.is_empty() {
                info!(row_id = row.id, "Row has no publishable text; skipping");
                self.store.save(row.id).await?;
                report.cursor_after = row.id;
                report.rows_skipped += 1;
                continue;
            }

            debug!(row_id = row.id, segments = segments.len(), "Publishing row");

            for (index, segment) in segments.iter().enumerate() {
                if published_any {
                    self.clock.sleep(self.settings.segment_delay).await;
                }

                match self.gateway.publish(segment).await {
                    PublishOutcome::Published { post_id, attempts } => {
                        published_any = true;
                        report.segments_published += 1;
                        debug!(
                            row_id = row.id,
                            segment = index + 1,
                            of = segments.len(),
                            attempts,
                            post_id = %post_id,
                            "Segment published"
                        );
                        if self.settings.persist_quota {
                            self.store.save_quota(self.gateway.quota_snapshot()).await?;
                        }
                    }
                    PublishOutcome::QuotaExceeded { resets_at } => {
                        warn!(
                            row_id = row.id,
                            segment = index + 1,
                            resets_at = %resets_at,
                            cursor = report.cursor_after,
                            "Quota exhausted; stopping run"
                        );
                        report.stopped = Some(StopReason::QuotaExceeded {
                            row_id: row.id,
                            resets_at,
                        });
                        return Ok(report);
                    }
                    PublishOutcome::Failed { reason } => {
                        warn!(
                            row_id = row.id,
                            segment = index + 1,
                            reason = %reason,
                            cursor = report.cursor_after,
                            "Publish failed; row will be retried next run"
                        );
                        report.stopped = Some(StopReason::Failed {
                            row_id: row.id,
                            segment_index: index,
                            reason,
                        });
                        return Ok(report);
                    }
                }
            }

            self.store.save(row.id).await?;
            report.cursor_after = row.id;
            report.rows_published += 1;
            info!(row_id = row.id, segments = segments.len(), "Row published; cursor advanced");
        }

        info!(
            cursor_before = report.cursor_before,
            cursor_after = report.cursor_after,
            rows_published = report.rows_published,
            segments_published = report.segments_published,
            "Run complete"
        );
        Ok(report)
    }
}
