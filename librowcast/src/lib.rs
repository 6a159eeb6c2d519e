//! Rowcast - republish new database rows as social posts
//!
//! Rows are read in id order, normalized, split into platform-sized
//! segments and published under a posting quota. A durable cursor records
//! the last fully-published row so each row goes out once across restarts
//! (at least once if the process dies mid-row).

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod platforms;
pub mod progress;
pub mod quota;
pub mod segment;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use db::Database;
pub use error::{Result, RowcastError};
pub use gateway::{GatewaySettings, PublishGateway};
pub use normalize::TextNormalizer;
pub use pipeline::{PipelineSettings, PublishPipeline};
pub use progress::{DatabaseProgressStore, FileProgressStore, ProgressStore};
pub use segment::TextSegmenter;
pub use source::{RowSource, SqlRowSource};
pub use types::{PublishOutcome, RawText, RunReport, SourceRow, StopReason};
