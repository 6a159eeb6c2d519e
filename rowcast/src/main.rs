//! rowcast - publish newly inserted database rows as social posts
//!
//! Runs the publish pipeline once (`--once`) or polls the row source until
//! interrupted.

use clap::Parser;
use librowcast::config::ProgressBackend;
use librowcast::logging::{LogFormat, LoggingConfig};
use librowcast::platforms::create_platform;
use librowcast::source::SqlRowSource;
use librowcast::{
    Clock, Config, Database, DatabaseProgressStore, FileProgressStore, GatewaySettings,
    PipelineSettings, ProgressStore, PublishGateway, PublishPipeline, Result, RowcastError,
    RunReport, StopReason, SystemClock,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rowcast")]
#[command(version)]
#[command(about = "Publish newly inserted database rows as social media posts")]
#[command(long_about = "\
rowcast - publish newly inserted database rows as social media posts

DESCRIPTION:
    rowcast reads rows with an id greater than its saved cursor, turns each
    row's text into one or more platform-sized posts, and publishes them in
    order. The cursor only moves past a row once all of its posts went out,
    so an interrupted row is published again on the next run.

USAGE:
    # Publish everything new, then exit (cron-friendly)
    rowcast --once

    # Poll every 10 minutes until SIGINT/SIGTERM
    rowcast --poll-interval 600

    # Try a new table without posting anywhere
    # ([platform] kind = \"dry-run\" prints posts to stdout)
    rowcast --once --config ./dry-run.toml

CONFIGURATION:
    --config PATH, then $ROWCAST_CONFIG, then ~/.config/rowcast/config.toml
    ROWCAST_SOURCE_URL and ROWCAST_ACCESS_TOKEN override the file.

EXIT CODES:
    0 - Success (including nothing to do, or a row that failed and will be retried)
    1 - Runtime error (database unreachable, authentication, progress store I/O)
    2 - Configuration error
")]
struct Cli {
    /// Process unseen rows once and exit
    #[arg(long)]
    once: bool,

    /// Seconds between polls (overrides daemon.poll_interval)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Configuration file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "rowcast failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    if let Some(seconds) = cli.poll_interval {
        if seconds == 0 {
            return Err(RowcastError::InvalidInput(
                "--poll-interval must be at least 1 second".to_string(),
            ));
        }
        config.daemon.poll_interval = Duration::from_secs(seconds);
    }

    // Credentials are read before any database or network activity
    let platform = create_platform(&config)?;

    let db = Database::connect(config.source_url()?).await?;
    let result = run_with_database(&cli, &config, &db, platform).await;
    db.close().await;
    result
}

async fn run_with_database(
    cli: &Cli,
    config: &Config,
    db: &Database,
    mut platform: Box<dyn librowcast::platforms::Platform>,
) -> Result<()> {
    platform.authenticate().await?;
    info!(platform = platform.name(), "Authenticated");

    let settings = PipelineSettings::from_config(config)?;
    settings.check_platform_limit(platform.as_ref())?;

    let store: Arc<dyn ProgressStore> = match config.progress.backend {
        ProgressBackend::File => {
            let path = config.progress.resolve_path()?;
            info!(path = %path.display(), "Using file progress store");
            Arc::new(FileProgressStore::new(path))
        }
        ProgressBackend::Database => {
            info!(key = %config.progress.key, "Using database progress store");
            Arc::new(DatabaseProgressStore::new(db.clone(), config.progress.key.clone()).await?)
        }
    };

    let source = Arc::new(SqlRowSource::new(db.clone(), &config.source)?);
    debug!(query = source.query(), "Row source ready");

    info!(
        max_segment_length = settings.segmenter.max_len(),
        normalization = ?settings.normalizer.mode(),
        "Publish settings"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = PublishGateway::new(platform, clock.clone(), GatewaySettings::from_config(config));
    let mut pipeline = PublishPipeline::new(source, store, gateway, clock, settings);

    if cli.once {
        let report = pipeline.run_once().await?;
        log_report(&report);
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    info!(
        platform = pipeline.gateway().platform_name(),
        poll_interval = %humantime::format_duration(config.daemon.poll_interval),
        "rowcast daemon starting"
    );
    run_daemon_loop(&mut pipeline, config.daemon.poll_interval, shutdown).await;
    info!("rowcast daemon stopped");

    Ok(())
}

fn log_report(report: &RunReport) {
    match &report.stopped {
        None => info!(
            cursor = report.cursor_after,
            rows = report.rows_published,
            segments = report.segments_published,
            skipped = report.rows_skipped,
            "Run finished"
        ),
        Some(StopReason::QuotaExceeded { row_id, resets_at }) => warn!(
            cursor = report.cursor_after,
            row_id,
            resets_at = %resets_at,
            "Run stopped: posting quota exhausted"
        ),
        Some(StopReason::Failed {
            row_id,
            segment_index,
            reason,
        }) => warn!(
            cursor = report.cursor_after,
            row_id,
            segment = segment_index + 1,
            reason = %reason,
            "Run stopped: row will be retried"
        ),
    }
}

/// SIGINT/SIGTERM set `shutdown`; a second signal exits immediately
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;
    use signal_hook::iterator::Signals;

    for signal in [SIGINT, SIGTERM] {
        // Checked before the flag is set, so only fires once shutdown is pending
        flag::register_conditional_shutdown(signal, 1, shutdown.clone())?;
    }

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "Received shutdown signal; send again to exit immediately");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

async fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(1)).await;
    }
}

async fn run_daemon_loop(
    pipeline: &mut PublishPipeline,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        // A run can sit in a quota wait or backoff for hours; shutdown cuts it
        // short and the unfinished row is republished on the next start
        tokio::select! {
            result = pipeline.run_once() => match result {
                Ok(report) => log_report(&report),
                Err(e) => error!(error = %e, "Run failed; will retry next poll"),
            },
            _ = wait_for_shutdown(&shutdown) => {
                warn!("Shutdown requested mid-run; abandoning current run");
                break;
            }
        }

        // Sleep until next poll, checking for shutdown every second
        for _ in 0..poll_interval.as_secs().max(1) {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
