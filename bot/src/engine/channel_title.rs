use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::presence::{PresenceSink, PresenceState};
use crate::store::SurfaceId;

/// Reads and renames the title of a chat channel.
#[async_trait]
pub trait ChannelTitles: Send + Sync {
    async fn title(&self, channel: &SurfaceId) -> anyhow::Result<String>;

    async fn rename(&self, channel: &SurfaceId, title: &str) -> anyhow::Result<()>;
}

pub type TitleFormat = Arc<dyn Fn(&PresenceState) -> String + Send + Sync>;

pub fn default_title(state: &PresenceState) -> String {
    match state {
        PresenceState::Online { players, max } => format!("Online: {players}/{max}"),
        PresenceState::Offline => "Server offline".into(),
        PresenceState::Error => "Status unavailable".into(),
        PresenceState::Unconfigured => "Server not configured".into(),
    }
}

/// [`PresenceSink`] that mirrors the presence state into one channel's
/// title. The channel is only renamed when its current title differs, since
/// chat backends rate-limit renames harshly.
pub struct ChannelTitleSink {
    channel: SurfaceId,
    titles: Arc<dyn ChannelTitles>,
    format: TitleFormat,
}

impl ChannelTitleSink {
    pub fn new(channel: SurfaceId, titles: Arc<dyn ChannelTitles>) -> Self {
        Self {
            channel,
            titles,
            format: Arc::new(default_title),
        }
    }

    pub fn with_format(mut self, format: TitleFormat) -> Self {
        self.format = format;
        self
    }
}

#[async_trait]
impl PresenceSink for ChannelTitleSink {
    async fn set_presence(&self, state: &PresenceState) -> anyhow::Result<()> {
        let wanted = (self.format)(state);
        let current = self
            .titles
            .title(&self.channel)
            .await
            .with_context(|| format!("failed to read title of channel {}", self.channel))?;

        if current == wanted {
            debug!(channel = %self.channel, title = %wanted, "channel title already current");
            return Ok(());
        }

        self.titles
            .rename(&self.channel, &wanted)
            .await
            .with_context(|| format!("failed to rename channel {}", self.channel))?;
        info!(channel = %self.channel, from = %current, to = %wanted, "channel title updated");
        Ok(())
    }
}

/// Dry-run backend: titles live in memory and every rename is a log line.
#[derive(Default)]
pub struct LogChannelTitles {
    titles: DashMap<SurfaceId, String>,
}

#[async_trait]
impl ChannelTitles for LogChannelTitles {
    async fn title(&self, channel: &SurfaceId) -> anyhow::Result<String> {
        Ok(self
            .titles
            .get(channel)
            .map(|t| t.value().clone())
            .unwrap_or_default())
    }

    async fn rename(&self, channel: &SurfaceId, title: &str) -> anyhow::Result<()> {
        info!(%channel, title, "channel renamed");
        self.titles.insert(channel.clone(), title.to_string());
        Ok(())
    }
}
