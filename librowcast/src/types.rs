//! Core types for Rowcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text of a source row as it came out of the database
///
/// Tables declared with a legacy single-byte charset may hand back raw bytes;
/// those are decoded by the normalizer before anything else happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawText {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for RawText {
    fn from(value: &str) -> Self {
        RawText::Text(value.to_string())
    }
}

impl From<String> for RawText {
    fn from(value: String) -> Self {
        RawText::Text(value)
    }
}

/// A row fetched from the row source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub id: i64,
    pub text: RawText,
}

impl SourceRow {
    pub fn new(id: i64, text: impl Into<RawText>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// How aggressively the normalizer rewrites text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationMode {
    #[default]
    PreserveUnicode,
    AsciiStrip,
}

/// What the gateway does when the quota window is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaPolicy {
    /// Sleep until the window resets, then post
    #[default]
    Wait,
    /// Return `QuotaExceeded` and let the pipeline stop
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

/// Result of publishing a single segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { post_id: String, attempts: u32 },
    QuotaExceeded { resets_at: DateTime<Utc> },
    Failed { reason: String },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Why a pipeline run stopped before draining the row source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    QuotaExceeded {
        row_id: i64,
        resets_at: DateTime<Utc>,
    },
    Failed {
        row_id: i64,
        segment_index: usize,
        reason: String,
    },
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub cursor_before: i64,
    pub cursor_after: i64,
    pub rows_fetched: usize,
    pub rows_published: usize,
    pub rows_skipped: usize,
    pub segments_published: usize,
    pub stopped: Option<StopReason>,
}

impl RunReport {
    pub(crate) fn starting_at(cursor: i64) -> Self {
        Self {
            cursor_before: cursor,
            cursor_after: cursor,
            rows_fetched: 0,
            rows_published: 0,
            rows_skipped: 0,
            segments_published: 0,
            stopped: None,
        }
    }

    /// True when the run found nothing to publish
    pub fn is_idle(&self) -> bool {
        self.rows_fetched == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: NormalizationMode,
        }

        let parsed: Wrapper = toml::from_str(r#"mode = "ascii-strip""#).unwrap();
        assert_eq!(parsed.mode, NormalizationMode::AsciiStrip);

        let parsed: Wrapper = toml::from_str(r#"mode = "preserve-unicode""#).unwrap();
        assert_eq!(parsed.mode, NormalizationMode::PreserveUnicode);
    }

    #[test]
    fn test_source_row_from_str() {
        let row = SourceRow::new(7, "hello");
        assert_eq!(row.id, 7);
        assert_eq!(row.text, RawText::Text("hello".to_string()));
    }

    #[test]
    fn test_run_report_idle() {
        let report = RunReport::starting_at(10);
        assert!(report.is_idle());
        assert_eq!(report.cursor_after, 10);
    }
}
