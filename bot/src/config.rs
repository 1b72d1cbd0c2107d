use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::engine::backoff::RetryPolicy;
use crate::engine::mcstatus::DEFAULT_API_BASE;
use crate::engine::snapshot::{ServerAddress, ServerKind};
use crate::engine::snapshot_cache::CacheConfig;
use crate::store::SurfaceId;

/// Shortest update interval accepted when `environment = "production"`.
pub const MIN_PRODUCTION_INTERVAL: Duration = Duration::from_secs(10);

/// Top-level configuration, loaded from statusync.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub sync: SyncSection,
    pub probe: ProbeSection,
    pub storage: StorageSection,
    pub presence: PresenceSection,
    pub player_count: PlayerCountSection,
    pub default_server: DefaultServerSection,
    pub log: LogSection,
    /// File the config was read from; `None` when running on defaults.
    #[serde(skip)]
    pub loaded_from: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub enabled: bool,
    /// Seconds between the end of one pass and the start of the next.
    pub update_interval_secs: u64,
    pub environment: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: 60,
            environment: "development".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub api_base: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Serve repeated gets from memory for this long. Off when unset.
    pub cache_ttl_secs: Option<u64>,
    /// Treat a server reporting zero capacity as offline.
    pub require_capacity: bool,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            timeout_secs: 10,
            max_retries: 3,
            base_delay_ms: 1000,
            cache_ttl_secs: None,
            require_capacity: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: "data/targets.json".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    pub enabled: bool,
    pub update_interval_secs: u64,
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: 60,
        }
    }
}

/// Channel whose title mirrors the primary server's player count.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlayerCountSection {
    pub enabled: bool,
    pub surface_id: Option<String>,
    pub update_interval_secs: u64,
}

impl Default for PlayerCountSection {
    fn default() -> Self {
        Self {
            enabled: false,
            surface_id: None,
            update_interval_secs: 60,
        }
    }
}

/// Server reported on when no target has been registered yet.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DefaultServerSection {
    pub host: Option<String>,
    pub port: u16,
    pub kind: ServerKind,
}

impl Default for DefaultServerSection {
    fn default() -> Self {
        Self {
            host: None,
            port: 25565,
            kind: ServerKind::Java,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl BotConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    ///
    /// Runs before logging is set up, so it records where the config came
    /// from in `loaded_from` instead of logging it.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            let mut config = Self::from_toml(&contents)
                .with_context(|| format!("failed to parse config file {path}"))?;
            config.loaded_from = Some(path.to_string());
            config
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("STATUSYNC_ENVIRONMENT") {
            self.sync.environment = v;
        }
        if let Some(v) = var("STATUSYNC_UPDATE_INTERVAL")
            && let Ok(secs) = v.parse()
        {
            self.sync.update_interval_secs = secs;
        }
        if let Some(v) = var("STATUSYNC_STORE_PATH") {
            self.storage.path = v;
        }
        if let Some(v) = var("STATUSYNC_API_BASE") {
            self.probe.api_base = v;
        }
        if let Some(v) = var("STATUSYNC_PROBE_TIMEOUT")
            && let Ok(secs) = v.parse()
        {
            self.probe.timeout_secs = secs;
        }
        if let Some(v) = var("STATUSYNC_MAX_RETRIES")
            && let Ok(n) = v.parse()
        {
            self.probe.max_retries = n;
        }
        if let Some(v) = var("STATUSYNC_CACHE_TTL")
            && let Ok(secs) = v.parse()
        {
            self.probe.cache_ttl_secs = Some(secs);
        }
        if let Some(v) = var("STATUSYNC_DEFAULT_HOST") {
            self.default_server.host = Some(v);
        }
        if let Some(v) = var("STATUSYNC_DEFAULT_PORT")
            && let Ok(port) = v.parse()
        {
            self.default_server.port = port;
        }
        if let Some(v) = var("STATUSYNC_DEFAULT_KIND")
            && let Ok(kind) = v.parse()
        {
            self.default_server.kind = kind;
        }
        if let Some(v) = var("STATUSYNC_PLAYER_COUNT_SURFACE") {
            self.player_count.surface_id = Some(v);
            self.player_count.enabled = true;
        }
        if let Some(v) = var("STATUSYNC_LOG") {
            self.log.level = v;
        }
    }

    pub fn is_production(&self) -> bool {
        self.sync.environment.eq_ignore_ascii_case("production")
    }

    /// Reconciliation interval, raised to the production floor when needed.
    pub fn update_interval(&self) -> Duration {
        self.floored(self.sync.update_interval_secs, "sync.update_interval_secs")
    }

    pub fn presence_interval(&self) -> Duration {
        self.floored(self.presence.update_interval_secs, "presence.update_interval_secs")
    }

    pub fn player_count_interval(&self) -> Duration {
        self.floored(self.player_count.update_interval_secs, "player_count.update_interval_secs")
    }

    /// Channel to keep renamed, when the feature is on and a channel is set.
    pub fn player_count_surface(&self) -> Option<SurfaceId> {
        if !self.player_count.enabled {
            return None;
        }
        let id = self.player_count.surface_id.as_deref().unwrap_or_default().trim();
        if id.is_empty() {
            warn!("player_count is enabled but no surface_id is configured");
            return None;
        }
        Some(SurfaceId::new(id))
    }

    fn floored(&self, secs: u64, field: &str) -> Duration {
        let requested = Duration::from_secs(secs);
        if self.is_production() && requested < MIN_PRODUCTION_INTERVAL {
            warn!(
                field,
                requested_secs = secs,
                floor_secs = MIN_PRODUCTION_INTERVAL.as_secs(),
                "interval below production floor, clamping"
            );
            return MIN_PRODUCTION_INTERVAL;
        }
        // A zero interval would spin the loop.
        requested.max(Duration::from_secs(1))
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            retry: RetryPolicy {
                max_retries: self.probe.max_retries,
                base_delay: Duration::from_millis(self.probe.base_delay_ms),
                probe_timeout: Duration::from_secs(self.probe.timeout_secs),
            },
            require_capacity: self.probe.require_capacity,
            cache_ttl: self.probe.cache_ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn default_server(&self) -> Option<ServerAddress> {
        let host = self.default_server.host.as_deref()?.trim();
        if host.is_empty() {
            return None;
        }
        Some(ServerAddress::new(host, self.default_server.port, self.default_server.kind))
    }
}
