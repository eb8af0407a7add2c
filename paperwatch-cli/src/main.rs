//! paperwatch CLI: one fetch-and-announce pass per invocation.
//!
//! Meant to be run from cron or a systemd timer. Exits non-zero when the
//! configuration is invalid or Discord login fails; per-paper problems are
//! logged and do not affect the exit code.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use paperwatch_core::config::{parse_watermark_override, RunOptions, Settings};
use paperwatch_core::delivery::{DeliveryLoop, DeliveryTarget};
use paperwatch_core::pipeline::{build_default_adapter, build_store, connect_discord, Pipeline};
use paperwatch_core::{ConfigError, MessageFormatter, NameMatcher, RunReport, Source};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Announce new arXiv papers by watched authors on Discord
#[derive(Parser, Debug)]
#[command(name = "paperwatch", version, about, long_about = None)]
struct Cli {
    /// Paper source: query (arXiv API) or feed (arXiv RSS). `api` and `rss` also work.
    #[arg(long, value_parser = parse_source)]
    source: Option<Source>,

    /// Do not save watermark files
    #[arg(long)]
    nosave: bool,

    /// Log messages instead of posting them to Discord
    #[arg(long)]
    nosend: bool,

    /// Override the stored query watermark (ISO-8601, query source only)
    #[arg(long, value_name = "DATETIME")]
    lastdate: Option<String>,

    /// Check the feed even if it was already checked today (feed source only)
    #[arg(long)]
    forcerss: bool,

    /// Post to the secondary (test) channel
    #[arg(long)]
    testchannel: bool,

    /// Configuration file path (defaults to ./paperwatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for watermark files and logs
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors to the terminal
    #[arg(short, long)]
    quiet: bool,
}

fn parse_source(s: &str) -> Result<Source, String> {
    Source::from_str_loose(s).ok_or_else(|| format!("unknown source '{s}', expected query or feed"))
}

impl Cli {
    fn stderr_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Apply flag overrides to the loaded settings.
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(dir) = &self.state_dir {
            settings.state_dir = dir.clone();
        }
    }

    fn run_options(&self, settings: &Settings) -> Result<RunOptions, ConfigError> {
        let watermark_override = self
            .lastdate
            .as_deref()
            .map(parse_watermark_override)
            .transpose()?;
        Ok(RunOptions {
            source: self.source.unwrap_or(settings.source),
            no_save: self.nosave,
            no_send: self.nosend,
            watermark_override,
            force_feed_check: self.forcerss,
            use_secondary_channel: self.testchannel,
        })
    }
}

/// Create `<state_dir>/logs`, returning its path.
fn ensure_log_dir(state_dir: &std::path::Path) -> std::io::Result<PathBuf> {
    let log_dir = state_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// Human-readable stderr plus daily-rolling JSON files under
/// `<state_dir>/logs`.
fn init_tracing(cli: &Cli, state_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let stderr_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(cli.stderr_filter()));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = ensure_log_dir(state_dir).unwrap_or_else(|e| {
        // Tracing is not installed yet.
        eprintln!(
            "paperwatch: cannot create log directory under {}: {e}; file logging may fail",
            state_dir.display()
        );
        state_dir.join("logs")
    });
    let file_appender = tracing_appender::rolling::daily(&log_dir, "paperwatch.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("paperwatch=debug,paperwatch_core=debug,info"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

async fn run(settings: Settings, options: RunOptions) -> anyhow::Result<RunReport> {
    settings.validate(&options)?;
    tracing::info!(
        source = %options.source,
        test_channel = options.use_secondary_channel,
        no_save = options.no_save,
        no_send = options.no_send,
        "Configuration loaded"
    );

    let target = if options.no_send {
        DeliveryTarget::LogOnly
    } else {
        let channel = connect_discord(&settings, &options)
            .await
            .context("Discord login failed, check the bot token and channel id")?;
        DeliveryTarget::Channel(channel)
    };

    let matcher = NameMatcher::new(settings.watch.authors.iter().cloned());
    let mut formatter = MessageFormatter::new(matcher, options.source)
        .with_discord_ids(settings.watch.discord_ids.clone());
    if let DeliveryTarget::Channel(channel) = &target
        && let Some(max) = channel.max_message_length()
    {
        formatter = formatter.with_max_length(max);
    }

    let delivery = DeliveryLoop::new(formatter, target)
        .with_send_delay(settings.delivery.send_delay())
        .with_send_timeout(settings.delivery.send_timeout());

    let adapter = build_default_adapter(options.source, &settings)?;
    let pipeline = Pipeline::new(Pipeline::coordinator_for(adapter, &settings), delivery);
    let store = build_store(&settings, &options);

    tokio::select! {
        report = pipeline.run(&store) => Ok(report),
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted before the run finished; watermarks not saved")
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let loaded = paperwatch_core::load_settings(cli.config.as_deref());
    let state_dir = match (&loaded, &cli.state_dir) {
        (_, Some(dir)) => dir.clone(),
        (Ok(settings), None) => settings.state_dir.clone(),
        (Err(_), None) => PathBuf::from("."),
    };
    let _guard = init_tracing(&cli, &state_dir);

    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };
    cli.apply_overrides(&mut settings);

    let options = match cli.run_options(&settings) {
        Ok(options) => options,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    match run(settings, options).await {
        Ok(report) => {
            if let Some(reason) = &report.upstream_failure {
                tracing::warn!(reason = %reason, "Upstream unavailable, will retry next run");
            }
            tracing::info!("paperwatch finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "paperwatch failed");
            ExitCode::FAILURE
        }
    }
}
