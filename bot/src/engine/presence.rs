use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::snapshot::{ServerAddress, ServerSnapshot};
use super::snapshot_cache::SnapshotCache;
use crate::store::TargetStore;

/// What the bot's own presence should say about the primary server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceState {
    Online { players: u32, max: u32 },
    /// The server answered and reported itself offline.
    Offline,
    /// The status could not be fetched (timeout, unreachable, rate limited).
    Error,
    /// No target and no default server to report on.
    Unconfigured,
}

impl PresenceState {
    pub fn from_snapshot(snapshot: &ServerSnapshot) -> Self {
        if snapshot.is_online() {
            PresenceState::Online {
                players: snapshot.players().online,
                max: snapshot.players().max,
            }
        } else if snapshot.error().is_some() {
            PresenceState::Error
        } else {
            PresenceState::Offline
        }
    }
}

#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn set_presence(&self, state: &PresenceState) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct LogPresenceSink;

#[async_trait]
impl PresenceSink for LogPresenceSink {
    async fn set_presence(&self, state: &PresenceState) -> anyhow::Result<()> {
        info!(?state, "presence updated");
        Ok(())
    }
}

/// Keeps the bot's presence in line with the primary server: the first
/// stored target, or the configured default server when nothing is stored.
///
/// Shares the [`SnapshotCache`] with the reconciliation loop, so a presence
/// refresh that lands during a pass joins the pass's probe instead of issuing
/// a second one. The sink is only called when the state changes.
pub struct PresenceSync {
    store: Arc<dyn TargetStore>,
    cache: SnapshotCache,
    sink: Arc<dyn PresenceSink>,
    fallback: Option<ServerAddress>,
    interval: Duration,
    last: Mutex<Option<PresenceState>>,
}

impl PresenceSync {
    pub fn new(
        store: Arc<dyn TargetStore>,
        cache: SnapshotCache,
        sink: Arc<dyn PresenceSink>,
        fallback: Option<ServerAddress>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            sink,
            fallback,
            interval,
            last: Mutex::new(None),
        }
    }

    pub async fn primary_server(&self) -> Option<ServerAddress> {
        let stored = self.store.load().await.targets.into_iter().next();
        stored.map(|t| t.server).or_else(|| self.fallback.clone())
    }

    /// Fetch, classify and publish once. Returns the computed state.
    pub async fn refresh(&self) -> PresenceState {
        let state = match self.primary_server().await {
            Some(server) => {
                let snapshot = self.cache.get(&server).await;
                if let Some(error) = snapshot.error() {
                    debug!(%server, error, "primary server status unavailable");
                }
                PresenceState::from_snapshot(&*snapshot)
            }
            None => PresenceState::Unconfigured,
        };

        let changed = {
            let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            last.as_ref() != Some(&state)
        };
        if !changed {
            debug!(?state, "presence unchanged");
            return state;
        }

        match self.sink.set_presence(&state).await {
            Ok(()) => {
                *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
            }
            Err(e) => {
                // Leave `last` alone so the next tick tries again.
                warn!(error = %e, "failed to update presence");
            }
        }
        state
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "presence sync started");
        loop {
            self.refresh().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("presence sync stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(shutdown).await })
    }
}
