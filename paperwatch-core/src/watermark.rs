//! File-backed cross-run state.
//!
//! Two plain-text files live in the state directory:
//!
//! - `last_submission_date.txt`: the query watermark, an RFC 3339 instant.
//!   The next query fetches papers submitted at or after it.
//! - `last_rss_check.txt`: when the feed was last checked, an RFC 3339 time
//!   in `America/New_York`. Only its calendar day matters.
//!
//! Both are read once at run start and written at most once at run end.
//! Missing or corrupt files never abort a run.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

pub const QUERY_WATERMARK_FILE: &str = "last_submission_date.txt";
pub const FEED_WATERMARK_FILE: &str = "last_rss_check.txt";

/// The feed publishes on the arXiv announcement schedule, which follows
/// US Eastern time.
pub const REFERENCE_TZ: Tz = chrono_tz::America::New_York;

/// Write to a `.tmp` sibling, then rename over the target.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// A naive ISO-8601 date-time or bare date, as written by hand.
fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a stored timestamp: RFC 3339, or a naive ISO-8601 date-time or date
/// taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_naive(raw).map(|naive| naive.and_utc())
}

/// Calendar day of a stored feed check in the reference zone. Values with an
/// offset are converted; naive values are already reference-zone local.
pub fn parse_feed_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&REFERENCE_TZ).date_naive());
    }
    parse_naive(raw).map(|naive| naive.date())
}

/// Cross-run watermark state rooted at one directory.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    state_dir: PathBuf,
    no_save: bool,
    force_feed_check: bool,
    query_override: Option<DateTime<Utc>>,
}

impl WatermarkStore {
    /// Open the store, creating the state directory if needed.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        if let Err(e) = std::fs::create_dir_all(&state_dir) {
            tracing::warn!(
                dir = %state_dir.display(),
                error = %e,
                "Could not create state directory"
            );
        }
        Self {
            state_dir,
            no_save: false,
            force_feed_check: false,
            query_override: None,
        }
    }

    /// Dry-run: every write becomes a no-op.
    pub fn with_no_save(mut self, no_save: bool) -> Self {
        self.no_save = no_save;
        self
    }

    /// Ignore the stored feed day and always report "not yet checked".
    pub fn with_force_feed_check(mut self, force: bool) -> Self {
        self.force_feed_check = force;
        self
    }

    /// Use this instant instead of the stored query watermark.
    pub fn with_query_override(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.query_override = ts;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn query_path(&self) -> PathBuf {
        self.state_dir.join(QUERY_WATERMARK_FILE)
    }

    pub fn feed_path(&self) -> PathBuf {
        self.state_dir.join(FEED_WATERMARK_FILE)
    }

    pub fn read_query_watermark(&self) -> DateTime<Utc> {
        self.read_query_watermark_at(Utc::now())
    }

    /// Stored query watermark, or `now - 1 day` when absent or unreadable.
    pub fn read_query_watermark_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(ts) = self.query_override {
            tracing::info!(watermark = %ts.to_rfc3339(), "Using query watermark override");
            return ts;
        }

        self.stored_query_watermark().unwrap_or_else(|| {
            tracing::info!("Query watermark defaulting to one day ago");
            now - Duration::days(1)
        })
    }

    /// The watermark persisted on disk, ignoring any override. `None` when
    /// absent or unreadable.
    pub fn stored_query_watermark(&self) -> Option<DateTime<Utc>> {
        let path = self.query_path();
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let parsed = parse_timestamp(&raw);
                match parsed {
                    Some(ts) => {
                        tracing::debug!(watermark = %ts.to_rfc3339(), "Loaded query watermark")
                    }
                    None => tracing::warn!(
                        path = %path.display(),
                        contents = raw.trim(),
                        "Corrupt query watermark"
                    ),
                }
                parsed
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    tracing::info!("No query watermark yet");
                } else {
                    tracing::warn!(path = %path.display(), error = %e, "Could not read query watermark");
                }
                None
            }
        }
    }

    pub fn write_query_watermark(&self, ts: DateTime<Utc>) -> io::Result<()> {
        if self.no_save {
            tracing::info!(watermark = %ts.to_rfc3339(), "Dry run: not saving query watermark");
            return Ok(());
        }
        atomic_write(&self.query_path(), ts.to_rfc3339().as_bytes())?;
        tracing::info!(watermark = %ts.to_rfc3339(), "Saved query watermark");
        Ok(())
    }

    pub fn has_checked_feed_today(&self) -> bool {
        self.has_checked_feed_on(Utc::now())
    }

    /// Whether the stored feed check falls on the same reference-zone day as
    /// `now`. Always false when the force flag is set.
    pub fn has_checked_feed_on(&self, now: DateTime<Utc>) -> bool {
        if self.force_feed_check {
            tracing::info!("Forcing feed check");
            return false;
        }

        let path = self.feed_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Could not read feed watermark");
                }
                return false;
            }
        };
        let Some(last_day) = parse_feed_day(&raw) else {
            tracing::warn!(path = %path.display(), contents = raw.trim(), "Corrupt feed watermark");
            return false;
        };

        last_day == now.with_timezone(&REFERENCE_TZ).date_naive()
    }

    pub fn mark_feed_checked_now(&self) -> io::Result<()> {
        self.mark_feed_checked_at(Utc::now())
    }

    pub fn mark_feed_checked_at(&self, now: DateTime<Utc>) -> io::Result<()> {
        let local = now.with_timezone(&REFERENCE_TZ).to_rfc3339();
        if self.no_save {
            tracing::info!(checked_at = %local, "Dry run: not saving feed check time");
            return Ok(());
        }
        atomic_write(&self.feed_path(), local.as_bytes())?;
        tracing::info!(checked_at = %local, "Saved feed check time");
        Ok(())
    }
}
