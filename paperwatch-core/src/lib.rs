//! # Paperwatch Core
//!
//! Watches arXiv for new papers by a list of authors and posts them to
//! Discord. Provides the two paper sources (query API and RSS feed), author
//! matching, cross-run watermark state, message formatting and the delivery
//! loop.

pub mod channels;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod formatter;
pub mod latex;
pub mod matcher;
pub mod paper;
pub mod pipeline;
pub mod sources;
pub mod watermark;

// Re-export commonly used types at the crate root.
pub use channels::{Channel, ChannelStatus, DiscordChannel, DiscordConfig, MessageId};
pub use config::{RunOptions, Settings, load_settings};
pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use delivery::{DeliveryLoop, DeliveryOutcome, DeliveryTarget, RunReport};
pub use error::{ChannelError, ConfigError, FormatError, PaperwatchError, Result, SourceError};
pub use formatter::MessageFormatter;
pub use matcher::NameMatcher;
pub use paper::{AnnounceType, Paper};
pub use pipeline::Pipeline;
pub use sources::{FetchBatch, FetchStatus, Source, SourceAdapter};
pub use watermark::WatermarkStore;
