use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::probe::{ProbeError, RawStatus, StatusProbe};
use super::snapshot::{PlayerCounts, RequestKey, ServerAddress, ServerSnapshot};
use super::subscribers::{SubscriberList, Subscription};

/// Delivered to subscribers every time a probe produces a new snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub key: RequestKey,
    pub server: ServerAddress,
    pub snapshot: Arc<ServerSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub retry: RetryPolicy,
    /// Treat a reachable server with zero player capacity as offline.
    pub require_capacity: bool,
    /// Serve a previous successful snapshot younger than this instead of
    /// probing. `None` disables the cache; every `get` then probes unless it
    /// can join an in-flight request.
    pub cache_ttl: Option<Duration>,
}

type SharedFetch = Shared<BoxFuture<'static, Arc<ServerSnapshot>>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

/// Answers "what is the status of server X" for every consumer in the
/// process. Cloning is cheap; clones share the in-flight map, the optional
/// cache and the subscriber list.
///
/// At most one probe per [`RequestKey`] is outstanding at any time. Callers
/// arriving while a probe is running await that same probe and receive the
/// same `Arc<ServerSnapshot>`. `get` never fails: every failure mode resolves
/// to an offline snapshot with error text.
#[derive(Clone)]
pub struct SnapshotCache {
    inner: Arc<Inner>,
}

struct Inner {
    probe: Arc<dyn StatusProbe>,
    config: CacheConfig,
    inflight: DashMap<RequestKey, InFlight>,
    recent: DashMap<RequestKey, Arc<ServerSnapshot>>,
    subscribers: SubscriberList<SnapshotEvent>,
    probe_count: AtomicU64,
    generation: AtomicU64,
}

impl SnapshotCache {
    pub fn new(probe: Arc<dyn StatusProbe>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                probe,
                config,
                inflight: DashMap::new(),
                recent: DashMap::new(),
                subscribers: SubscriberList::new(),
                probe_count: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current status of `server`, served from the time-boxed cache when it
    /// is enabled and holds a fresh entry.
    pub async fn get(&self, server: &ServerAddress) -> Arc<ServerSnapshot> {
        if let Some(ttl) = self.inner.config.cache_ttl
            && let Some(hit) = self.cached(&server.request_key(), ttl)
        {
            debug!(key = %server.request_key(), "serving cached snapshot");
            return hit;
        }
        self.get_fresh(server).await
    }

    /// Current status of `server`, bypassing the time-boxed cache. Still joins
    /// an in-flight probe for the same key.
    pub async fn get_fresh(&self, server: &ServerAddress) -> Arc<ServerSnapshot> {
        if let Err(reason) = super::validation::validate_server(server) {
            warn!(server = %server, %reason, "refusing to probe invalid server address");
            return Arc::new(ServerSnapshot::offline(reason));
        }

        let key = server.request_key();
        let fetch = match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(%key, "joining in-flight status request");
                entry.get().fetch.clone()
            }
            Entry::Vacant(entry) => {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let server = server.clone();
                let fetch_key = key.clone();
                let fetch = async move { inner.fetch_and_publish(fetch_key, server, generation).await }
                    .boxed()
                    .shared();
                entry.insert(InFlight {
                    generation,
                    fetch: fetch.clone(),
                });
                fetch
            }
        };

        fetch.await
    }

    /// Register a callback invoked with every freshly produced snapshot.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SnapshotEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    /// Drop every time-boxed cache entry. In-flight probes are unaffected.
    pub fn clear_cache(&self) {
        self.inner.recent.clear();
    }

    /// Total probe attempts issued since construction, retries included.
    pub fn probe_count(&self) -> u64 {
        self.inner.probe_count.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    fn cached(&self, key: &RequestKey, ttl: Duration) -> Option<Arc<ServerSnapshot>> {
        let entry = self.inner.recent.get(key)?;
        let age = (Utc::now() - entry.fetched_at()).to_std().unwrap_or_default();
        (age < ttl).then(|| Arc::clone(entry.value()))
    }
}

impl Inner {
    async fn fetch_and_publish(
        &self,
        key: RequestKey,
        server: ServerAddress,
        generation: u64,
    ) -> Arc<ServerSnapshot> {
        let snapshot = Arc::new(self.fetch(&key, &server).await);

        if self.config.cache_ttl.is_some() && snapshot.error().is_none() {
            self.recent.insert(key.clone(), Arc::clone(&snapshot));
        }

        // Callers arriving from here on start a new probe.
        self.inflight
            .remove_if(&key, |_, current| current.generation == generation);

        let event = SnapshotEvent {
            key,
            server,
            snapshot: Arc::clone(&snapshot),
        };
        self.subscribers.notify(&event);

        snapshot
    }

    async fn fetch(&self, key: &RequestKey, server: &ServerAddress) -> ServerSnapshot {
        let policy = self.config.retry;
        let host = server.normalized_host();
        let mut retries = 0u32;

        loop {
            let request = self.probe_count.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(request, %key, attempt = retries + 1, "fetching server status");

            let attempt = AssertUnwindSafe(self.probe.probe(&host, server.port, server.kind))
                .catch_unwind();
            let result = match tokio::time::timeout(policy.probe_timeout, attempt).await {
                Ok(Ok(result)) => result,
                Ok(Err(_panic)) => Err(ProbeError::Protocol("status probe panicked".into())),
                Err(_elapsed) => Err(ProbeError::Timeout),
            };

            match result {
                Ok(raw) => {
                    let snapshot = self.build_snapshot(raw);
                    info!(
                        %key,
                        online = snapshot.is_online(),
                        players = snapshot.players().online,
                        max = snapshot.players().max,
                        "server status fetched"
                    );
                    return snapshot;
                }
                Err(e) if e.is_retryable() && retries < policy.max_retries => {
                    retries += 1;
                    let delay = policy.delay_for(retries);
                    warn!(
                        %key,
                        retry = retries,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(%key, retries, "retries exhausted, reporting server offline");
                    } else {
                        warn!(%key, error = %e, "status probe failed");
                    }
                    return ServerSnapshot::offline(e.to_string());
                }
            }
        }
    }

    fn build_snapshot(&self, raw: RawStatus) -> ServerSnapshot {
        let online = raw.reachable && (!self.config.require_capacity || raw.players_max > 0);
        if online {
            ServerSnapshot::online(
                PlayerCounts {
                    online: raw.players_online,
                    max: raw.players_max,
                    list: raw.players,
                },
                raw.motd,
                raw.version,
            )
        } else {
            ServerSnapshot::reachable_but_offline(raw.motd, raw.version)
        }
    }
}
