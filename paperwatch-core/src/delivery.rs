//! Posts the run's papers and advances the watermark.
//!
//! Every paper handed to [`DeliveryLoop::run`] is processed at most once,
//! whatever the outcome of formatting or sending. The watermark is written
//! once, after the last send.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::channels::{Channel, MessageId};
use crate::coordinator::FetchOutcome;
use crate::error::{ChannelError, FormatError};
use crate::formatter::MessageFormatter;
use crate::paper::Paper;
use crate::sources::Source;
use crate::watermark::WatermarkStore;

/// Pause between consecutive sends.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Where formatted messages go.
pub enum DeliveryTarget {
    Channel(Box<dyn Channel>),
    /// `no_send`: messages are logged at debug level instead of posted.
    LogOnly,
}

/// What happened to one paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent(MessageId),
    Logged,
    FormatFailed(FormatError),
    SendFailed(ChannelError),
}

/// Summary of one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub source: Source,
    pub skipped: bool,
    pub upstream_failure: Option<String>,
    pub dropped: usize,
    pub processed: usize,
    pub sent: usize,
    pub logged: usize,
    pub format_failed: usize,
    pub send_failed: usize,
    /// Query watermark after this run, when it moved or was re-saved.
    pub new_watermark: Option<DateTime<Utc>>,
    pub feed_marked: bool,
    pub results: Vec<(String, DeliveryOutcome)>,
}

impl RunReport {
    fn record(&mut self, id: &str, outcome: DeliveryOutcome) {
        self.processed += 1;
        match &outcome {
            DeliveryOutcome::Sent(_) => self.sent += 1,
            DeliveryOutcome::Logged => self.logged += 1,
            DeliveryOutcome::FormatFailed(_) => self.format_failed += 1,
            DeliveryOutcome::SendFailed(_) => self.send_failed += 1,
        }
        self.results.push((id.to_string(), outcome));
    }

    pub fn log_summary(&self) {
        tracing::info!(
            source = %self.source,
            skipped = self.skipped,
            upstream_failure = self.upstream_failure.as_deref().unwrap_or("none"),
            dropped = self.dropped,
            processed = self.processed,
            sent = self.sent,
            logged = self.logged,
            format_failed = self.format_failed,
            send_failed = self.send_failed,
            new_watermark = ?self.new_watermark.map(|ts| ts.to_rfc3339()),
            feed_marked = self.feed_marked,
            "Run complete"
        );
    }
}

/// Query watermark after processing papers up to `max_published`: one second
/// past the newest paper, never behind the stored watermark.
pub fn next_query_watermark(
    stored: Option<DateTime<Utc>>,
    max_published: DateTime<Utc>,
) -> DateTime<Utc> {
    let candidate = max_published + chrono::Duration::seconds(1);
    stored.map_or(candidate, |prev| prev.max(candidate))
}

pub struct DeliveryLoop {
    formatter: MessageFormatter,
    target: DeliveryTarget,
    send_delay: Duration,
    send_timeout: Duration,
}

impl DeliveryLoop {
    pub fn new(formatter: MessageFormatter, target: DeliveryTarget) -> Self {
        Self {
            formatter,
            target,
            send_delay: DEFAULT_SEND_DELAY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub async fn run(&self, outcome: FetchOutcome, store: &WatermarkStore) -> RunReport {
        let mut report = RunReport {
            source: outcome.source,
            skipped: outcome.skipped,
            upstream_failure: outcome.upstream_failure.clone(),
            dropped: outcome.dropped.len(),
            ..Default::default()
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut max_published: Option<DateTime<Utc>> = None;
        let total = outcome.papers.len();

        for (index, paper) in outcome.papers.iter().enumerate() {
            if !seen.insert(paper.id.clone()) {
                tracing::debug!(id = %paper.id, "Already processed this run");
                continue;
            }
            max_published = Some(max_published.map_or(paper.published, |m| m.max(paper.published)));

            let result = self.deliver(paper).await;
            let attempted_send =
                matches!(result, DeliveryOutcome::Sent(_) | DeliveryOutcome::SendFailed(_));
            report.record(&paper.id, result);

            if attempted_send && index + 1 < total && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
        }

        match outcome.source {
            Source::Query => match max_published {
                Some(max) => {
                    // Compare against what is on disk, not the override
                    // the fetch may have started from.
                    let next = next_query_watermark(store.stored_query_watermark(), max);
                    match store.write_query_watermark(next) {
                        Ok(()) => report.new_watermark = Some(next),
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to save query watermark")
                        }
                    }
                }
                None => tracing::info!("No papers processed, query watermark unchanged"),
            },
            Source::Feed => {
                if outcome.attempted() && !outcome.upstream_failed() {
                    match store.mark_feed_checked_now() {
                        Ok(()) => report.feed_marked = true,
                        Err(e) => tracing::error!(error = %e, "Failed to save feed check time"),
                    }
                }
            }
        }

        report
    }

    async fn deliver(&self, paper: &Paper) -> DeliveryOutcome {
        let text = match self.formatter.format(paper) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(id = %paper.id, title = %paper.title, error = %e, "Could not format message, skipping");
                return DeliveryOutcome::FormatFailed(e);
            }
        };

        let channel = match &self.target {
            DeliveryTarget::Channel(channel) => channel,
            DeliveryTarget::LogOnly => {
                tracing::info!(id = %paper.id, "Sending disabled, not posting");
                tracing::debug!(id = %paper.id, message = %text, "Message");
                return DeliveryOutcome::Logged;
            }
        };

        match tokio::time::timeout(self.send_timeout, channel.send(&text)).await {
            Ok(Ok(message_id)) => {
                tracing::info!(id = %paper.id, message_id = %message_id, "Posted paper");
                DeliveryOutcome::Sent(message_id)
            }
            Ok(Err(e)) => {
                tracing::error!(id = %paper.id, error = %e, "Failed to post paper");
                DeliveryOutcome::SendFailed(e)
            }
            Err(_) => {
                let e = ChannelError::Timeout {
                    name: channel.name().to_string(),
                    timeout_secs: self.send_timeout.as_secs(),
                };
                tracing::error!(id = %paper.id, error = %e, "Failed to post paper");
                DeliveryOutcome::SendFailed(e)
            }
        }
    }
}
