//! One complete run: build the adapter for the configured source, fetch,
//! deliver, persist.

use std::sync::Arc;

use crate::channels::{Channel, DiscordConfig, create_discord_channel};
use crate::config::{RunOptions, Settings};
use crate::coordinator::FetchCoordinator;
use crate::delivery::{DeliveryLoop, RunReport};
use crate::error::Result;
use crate::matcher::NameMatcher;
use crate::sources::{
    ArxivApi, ArxivApiClient, FeedAdapter, FeedFetcher, QueryAdapter, RssFeedClient, Source,
    SourceAdapter,
};
use crate::watermark::WatermarkStore;

/// Build the adapter for `source` over the given upstream clients.
pub fn build_adapter(
    source: Source,
    settings: &Settings,
    api: Arc<dyn ArxivApi>,
    feed: Arc<dyn FeedFetcher>,
) -> Arc<dyn SourceAdapter> {
    match source {
        Source::Query => Arc::new(QueryAdapter::new(
            api,
            settings.arxiv.category.clone(),
            settings.watch.authors.clone(),
            settings.arxiv.max_results,
        )),
        Source::Feed => Arc::new(FeedAdapter::new(
            feed,
            settings.arxiv.category.clone(),
            settings.arxiv.max_results,
        )),
    }
}

/// Build the adapter for `source` over the real arXiv endpoints.
pub fn build_default_adapter(
    source: Source,
    settings: &Settings,
) -> Result<Arc<dyn SourceAdapter>> {
    Ok(build_adapter(
        source,
        settings,
        Arc::new(ArxivApiClient::new()?),
        Arc::new(RssFeedClient::new()?),
    ))
}

/// The store for a run, honoring the dry-run and override flags.
pub fn build_store(settings: &Settings, options: &RunOptions) -> WatermarkStore {
    WatermarkStore::new(&settings.state_dir)
        .with_no_save(options.no_save)
        .with_force_feed_check(options.force_feed_check)
        .with_query_override(options.watermark_override)
}

/// Log in to Discord and resolve the run's target channel.
pub async fn connect_discord(
    settings: &Settings,
    options: &RunOptions,
) -> Result<Box<dyn Channel>> {
    let config = DiscordConfig {
        bot_token: settings.discord.bot_token.clone(),
        channel_id: settings.target_channel_id(options),
    };
    let name = if options.use_secondary_channel {
        "discord-test"
    } else {
        "discord"
    };
    let mut channel = create_discord_channel(config).with_name(name);
    channel.connect().await?;
    Ok(Box::new(channel))
}

pub struct Pipeline {
    coordinator: FetchCoordinator,
    delivery: DeliveryLoop,
}

impl Pipeline {
    pub fn new(coordinator: FetchCoordinator, delivery: DeliveryLoop) -> Self {
        Self {
            coordinator,
            delivery,
        }
    }

    /// Coordinator for `adapter` filtering on the configured watch-list.
    pub fn coordinator_for(adapter: Arc<dyn SourceAdapter>, settings: &Settings) -> FetchCoordinator {
        FetchCoordinator::new(adapter, NameMatcher::new(settings.watch.authors.iter().cloned()))
    }

    pub async fn run(&self, store: &WatermarkStore) -> RunReport {
        let outcome = self.coordinator.fetch_new_papers(store).await;
        let report = self.delivery.run(outcome, store).await;
        report.log_summary();
        report
    }
}
