//! Configuration system for paperwatch.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! local or explicit config file -> environment -> CLI flags. The user config
//! lives at `~/.config/paperwatch/config.toml`; the local one is
//! `./paperwatch.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sources::Source;
use crate::watermark::parse_timestamp;

pub const LOCAL_CONFIG_FILE: &str = "paperwatch.toml";
pub const DEFAULT_CATEGORY: &str = "quant-ph";
pub const DEFAULT_MAX_RESULTS: usize = 50;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default source when the CLI does not pick one.
    pub source: Source,
    /// Directory holding watermark files and logs.
    pub state_dir: PathBuf,
    pub discord: DiscordSettings,
    pub watch: WatchSettings,
    pub arxiv: ArxivSettings,
    pub delivery: DeliverySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: Source::Feed,
            state_dir: PathBuf::from("."),
            discord: DiscordSettings::default(),
            watch: WatchSettings::default(),
            arxiv: ArxivSettings::default(),
            delivery: DeliverySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub channel_id: u64,
    /// Secondary channel selected with `--testchannel`.
    pub test_channel_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Author names to watch, spelled as arXiv lists them.
    pub authors: Vec<String>,
    /// Watch-list name → Discord user id, for mentions.
    pub discord_ids: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivSettings {
    pub category: String,
    pub max_results: usize,
}

impl Default for ArxivSettings {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub send_delay_ms: u64,
    pub send_timeout_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            send_delay_ms: 1000,
            send_timeout_secs: 30,
        }
    }
}

impl DeliverySettings {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Per-invocation flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub source: Source,
    /// Dry run: never write watermark files.
    pub no_save: bool,
    /// Log messages instead of posting them.
    pub no_send: bool,
    /// Query watermark to use instead of the stored one.
    pub watermark_override: Option<DateTime<Utc>>,
    /// Fetch the feed even if it was already checked today.
    pub force_feed_check: bool,
    pub use_secondary_channel: bool,
}

/// Parse a `--lastdate` value.
pub fn parse_watermark_override(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    parse_timestamp(raw).ok_or_else(|| ConfigError::Invalid {
        message: format!("invalid date '{}', expected ISO-8601 such as 2024-10-01T00:00:00", raw),
    })
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "paperwatch", "paperwatch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load settings from the standard locations.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`PAPERWATCH_DISCORD__CHANNEL_ID`, ...)
/// 2. `DISCORD_TOKEN`
/// 3. `config_path` if given, otherwise `./paperwatch.toml`
/// 4. User config (`~/.config/paperwatch/config.toml`)
/// 5. Built-in defaults
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings, ConfigError> {
    load_settings_from(user_config_path().as_deref(), config_path)
}

pub fn load_settings_from(
    user_config: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<Settings, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    if let Some(user_config) = user_config.filter(|p| p.exists()) {
        figment = figment.merge(Toml::file(user_config));
    }

    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let local = Path::new(LOCAL_CONFIG_FILE);
            if local.exists() {
                figment = figment.merge(Toml::file(local));
            }
        }
    }

    figment = figment
        .merge(
            Env::raw()
                .only(&["DISCORD_TOKEN"])
                .map(|_| "discord.bot_token".into()),
        )
        .merge(Env::prefixed("PAPERWATCH_").split("__"));

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

impl Settings {
    /// Channel the run posts to.
    pub fn target_channel_id(&self, options: &RunOptions) -> u64 {
        if options.use_secondary_channel {
            self.discord.test_channel_id.unwrap_or(0)
        } else {
            self.discord.channel_id
        }
    }

    /// Reject configurations that cannot run. Called before any fetch.
    pub fn validate(&self, options: &RunOptions) -> Result<(), ConfigError> {
        if options.watermark_override.is_some() && options.source != Source::Query {
            return Err(ConfigError::IncompatibleOptions {
                message: "a watermark override (--lastdate) requires the query source".into(),
            });
        }
        if options.force_feed_check && options.source != Source::Feed {
            return Err(ConfigError::IncompatibleOptions {
                message: "--forcerss requires the feed source".into(),
            });
        }

        if !self.watch.authors.iter().any(|a| !a.trim().is_empty()) {
            return Err(ConfigError::MissingField {
                field: "watch.authors".into(),
            });
        }
        if self.arxiv.category.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "arxiv.category must not be empty".into(),
            });
        }
        if self.arxiv.max_results == 0 {
            return Err(ConfigError::Invalid {
                message: "arxiv.max_results must be at least 1".into(),
            });
        }

        if !options.no_send {
            if self.discord.bot_token.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "discord.bot_token".into(),
                });
            }
            if self.target_channel_id(options) == 0 {
                let field = if options.use_secondary_channel {
                    "discord.test_channel_id"
                } else {
                    "discord.channel_id"
                };
                return Err(ConfigError::MissingField {
                    field: field.into(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.discord.bot_token = "token".into();
        settings.discord.channel_id = 42;
        settings.watch.authors = vec!["Alice Smith".into()];
        settings
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.source, Source::Feed);
        assert_eq!(settings.arxiv.category, "quant-ph");
        assert_eq!(settings.arxiv.max_results, 50);
        assert_eq!(settings.delivery.send_delay(), Duration::from_secs(1));
        assert_eq!(settings.delivery.send_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paperwatch.toml");
        std::fs::write(
            &path,
            r#"
source = "query"
state_dir = "/var/lib/paperwatch"

[discord]
channel_id = 1234
test_channel_id = 5678

[watch]
authors = ["Alice Smith", "Bob Jones"]

[watch.discord_ids]
"Alice Smith" = 99

[arxiv]
category = "cond-mat"
"#,
        )
        .unwrap();

        let settings = load_settings_from(None, Some(&path)).unwrap();
        assert_eq!(settings.source, Source::Query);
        assert_eq!(settings.discord.channel_id, 1234);
        assert_eq!(settings.discord.test_channel_id, Some(5678));
        assert_eq!(settings.watch.authors.len(), 2);
        assert_eq!(settings.watch.discord_ids.get("Alice Smith"), Some(&99));
        assert_eq!(settings.arxiv.category, "cond-mat");
        // Unset fields keep their defaults.
        assert_eq!(settings.arxiv.max_results, 50);
    }

    #[test]
    fn test_explicit_file_overrides_user_file() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&user, "[arxiv]\ncategory = \"hep-th\"\nmax_results = 10\n").unwrap();
        std::fs::write(&explicit, "[arxiv]\ncategory = \"cs.LG\"\n").unwrap();

        let settings = load_settings_from(Some(&user), Some(&explicit)).unwrap();
        assert_eq!(settings.arxiv.category, "cs.LG");
        assert_eq!(settings.arxiv.max_results, 10);
    }

    #[test]
    fn test_config_file_accepts_source_aliases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paperwatch.toml");
        std::fs::write(&path, "source = \"api\"\n").unwrap();
        let settings = load_settings_from(None, Some(&path)).unwrap();
        assert_eq!(settings.source, Source::Query);

        std::fs::write(&path, "source = \"rss\"\n").unwrap();
        let settings = load_settings_from(None, Some(&path)).unwrap();
        assert_eq!(settings.source, Source::Feed);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let err = load_settings_from(None, Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[discord]\nchannel_id = \"not a number\"\n").unwrap();
        let err = load_settings_from(None, Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_validate_ok() {
        let options = RunOptions::default();
        assert!(valid_settings().validate(&options).is_ok());
    }

    #[test]
    fn test_validate_override_requires_query() {
        let options = RunOptions {
            source: Source::Feed,
            watermark_override: Some(Utc::now()),
            ..Default::default()
        };
        let err = valid_settings().validate(&options).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn test_validate_force_requires_feed() {
        let options = RunOptions {
            source: Source::Query,
            force_feed_check: true,
            ..Default::default()
        };
        let err = valid_settings().validate(&options).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn test_validate_token_required_unless_no_send() {
        let mut settings = valid_settings();
        settings.discord.bot_token = String::new();
        let err = settings.validate(&RunOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "discord.bot_token"));

        let options = RunOptions {
            no_send: true,
            ..Default::default()
        };
        assert!(settings.validate(&options).is_ok());
    }

    #[test]
    fn test_validate_empty_watch_list() {
        let mut settings = valid_settings();
        settings.watch.authors = vec!["  ".into()];
        let err = settings.validate(&RunOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "watch.authors"));
    }

    #[test]
    fn test_secondary_channel_selection() {
        let mut settings = valid_settings();
        let options = RunOptions {
            use_secondary_channel: true,
            ..Default::default()
        };
        let err = settings.validate(&options).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field } if field == "discord.test_channel_id")
        );

        settings.discord.test_channel_id = Some(7);
        assert!(settings.validate(&options).is_ok());
        assert_eq!(settings.target_channel_id(&options), 7);
        assert_eq!(settings.target_channel_id(&RunOptions::default()), 42);
    }

    #[test]
    fn test_parse_watermark_override() {
        let ts = parse_watermark_override("2024-10-01T00:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-10-01T00:00:00+00:00");
        assert!(parse_watermark_override("last tuesday").is_err());
    }
}
