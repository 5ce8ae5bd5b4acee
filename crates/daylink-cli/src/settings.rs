use std::fmt;
use std::time::Duration;

use daylink_core::{AmbiguityPolicy, CollectionId, DayNormalizer, ReconcileConfig, Schema};
use daylink_notion::{NotionConfig, DEFAULT_BASE_URL};
use time::UtcOffset;

pub const TOKEN_VAR: &str = "NOTION_TOKEN";
pub const SOURCE_DB_VAR: &str = "NOTION_DB_WALLET_ID";
pub const TARGET_DB_VAR: &str = "NOTION_DB_DAILY_ID";
pub const BASE_URL_VAR: &str = "NOTION_API_BASE_URL";
/// A century of hours keeps `now - window` well inside the calendar range.
pub const MAX_WINDOW_HOURS: i64 = 24 * 366 * 100;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("window of {0} hours is outside 1..={MAX_WINDOW_HOURS}")]
    WindowOutOfRange(i64),
}

/// Tunables that come from the command line rather than the environment.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub window_hours: i64,
    pub day_offset: UtcOffset,
    pub on_ambiguous: AmbiguityPolicy,
    pub page_size: u32,
    pub timeout: Duration,
    pub dry_run: bool,
    pub schema: Schema,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            window_hours: daylink_core::DEFAULT_WINDOW_HOURS,
            day_offset: UtcOffset::UTC,
            on_ambiguous: AmbiguityPolicy::Link,
            page_size: daylink_notion::DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(daylink_notion::DEFAULT_TIMEOUT_SECS),
            dry_run: false,
            schema: Schema::default(),
        }
    }
}

/// Everything one run needs, resolved before any request is made.
#[derive(Clone)]
pub struct Settings {
    token: String,
    source_db: CollectionId,
    target_db: CollectionId,
    base_url: String,
    options: RunOptions,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("token", &"<redacted>")
            .field("source_db", &self.source_db)
            .field("target_db", &self.target_db)
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .finish()
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    ///
    /// # Errors
    /// See [`Settings::from_lookup`].
    pub fn from_env(options: RunOptions) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), options)
    }

    /// Resolve settings through `lookup`. Blank values count as unset.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] naming every required variable that is absent,
    /// and [`ConfigError::WindowOutOfRange`] for a window the clock cannot represent.
    pub fn from_lookup<F>(lookup: F, options: RunOptions) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name).map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
        };

        let mut missing = Vec::new();
        let mut required = |name: &'static str| {
            let value = read(name);
            if value.is_none() {
                missing.push(name);
            }
            value.unwrap_or_default()
        };
        let token = required(TOKEN_VAR);
        let source_db = required(SOURCE_DB_VAR);
        let target_db = required(TARGET_DB_VAR);
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&options.window_hours) {
            return Err(ConfigError::WindowOutOfRange(options.window_hours));
        }

        Ok(Self {
            token,
            source_db: CollectionId::new(source_db),
            target_db: CollectionId::new(target_db),
            base_url: read(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            options,
        })
    }

    #[must_use]
    pub fn reconcile_config(&self) -> ReconcileConfig {
        let mut config = ReconcileConfig::new(self.source_db.clone(), self.target_db.clone());
        config.schema = self.options.schema.clone();
        config.window = time::Duration::hours(self.options.window_hours);
        config.normalizer = DayNormalizer::with_offset(self.options.day_offset);
        config.on_ambiguous = self.options.on_ambiguous;
        config.dry_run = self.options.dry_run;
        config
    }

    #[must_use]
    pub fn notion_config(&self) -> NotionConfig {
        let mut config = NotionConfig::new(self.token.clone());
        config.base_url = self.base_url.clone();
        config.page_size = self.options.page_size;
        config.timeout = self.options.timeout;
        config
    }
}
