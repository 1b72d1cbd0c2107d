use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::renderer::{RenderError, Renderer, SurfaceState};
use super::snapshot::ServerSnapshot;
use super::snapshot_cache::SnapshotCache;
use super::validation;
use crate::store::{DisplayTarget, SurfaceId, TargetStore};

/// What a single reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub loaded: usize,
    pub kept: usize,
    /// Targets dropped because their surface is gone.
    pub pruned: usize,
    pub render_failures: usize,
    pub resolve_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already running; this one did nothing.
    Skipped,
    Completed(PassReport),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid surface id: {0}")]
    InvalidSurface(String),
    #[error("invalid server address: {0}")]
    InvalidServer(String),
}

#[derive(Debug, Clone)]
pub struct Registration {
    /// An earlier target for the same surface was replaced.
    pub replaced: bool,
    /// Status pushed to the surface right after registering.
    pub snapshot: Arc<ServerSnapshot>,
}

/// Clears the running flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically pushes fresh server status to every tracked target and drops
/// targets whose surface has been deleted.
///
/// At most one pass runs at a time. A tick that arrives while a pass is in
/// progress is dropped, not queued. Targets are visited one after another in
/// stored order, and the next tick is scheduled `update_interval` after the
/// previous pass finished.
pub struct ReconciliationLoop {
    store: Arc<dyn TargetStore>,
    cache: SnapshotCache,
    renderer: Arc<dyn Renderer>,
    update_interval: Duration,
    running: AtomicBool,
    passes: AtomicU64,
}

impl ReconciliationLoop {
    pub fn new(
        store: Arc<dyn TargetStore>,
        cache: SnapshotCache,
        renderer: Arc<dyn Renderer>,
        update_interval: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            renderer,
            update_interval,
            running: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of passes that ran to completion.
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Run one pass now unless one is already running.
    pub async fn run_pass(&self) -> PassOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!("reconciliation already in progress, skipping tick");
            return PassOutcome::Skipped;
        };

        let report = self.reconcile().await;
        self.passes.fetch_add(1, Ordering::Relaxed);
        PassOutcome::Completed(report)
    }

    /// Drive passes until `shutdown` fires: one immediately, then one
    /// `update_interval` after each completes. Shutdown is observed between
    /// passes; a running pass always finishes.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.update_interval.as_secs(),
            "reconciliation loop started"
        );

        loop {
            match self.run_pass().await {
                PassOutcome::Completed(report) => debug!(?report, "reconciliation pass finished"),
                PassOutcome::Skipped => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.update_interval) => {}
            }
        }

        info!("reconciliation loop stopped");
    }

    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(shutdown).await })
    }

    async fn reconcile(&self) -> PassReport {
        let targets = self.store.load().await.targets;
        let mut report = PassReport {
            loaded: targets.len(),
            ..PassReport::default()
        };

        if targets.is_empty() {
            debug!("no targets to reconcile");
            return report;
        }
        debug!(count = targets.len(), "reconciling targets");

        let mut pruned: Vec<DisplayTarget> = Vec::new();
        for target in targets {
            match self.resolve(&target).await {
                Ok(SurfaceState::Present) => {}
                Ok(SurfaceState::Missing) => {
                    info!(surface = %target.id, server = %target.server, "surface is gone, dropping target");
                    pruned.push(target);
                    continue;
                }
                Err(e) => {
                    // Not a confirmed deletion. Keep tracking, try again next pass.
                    report.resolve_failures += 1;
                    warn!(surface = %target.id, error = %e, "could not look up surface");
                    continue;
                }
            }

            let snapshot = self.cache.get(&target.server).await;
            if let Err(e) = self.push(&target, &snapshot).await {
                report.render_failures += 1;
                warn!(surface = %target.id, error = %e, "failed to update status display");
            }
        }
        report.pruned = pruned.len();

        let survivors = self.survivors(&pruned).await;
        report.kept = survivors.len();

        if survivors.is_empty() {
            warn!(
                loaded = report.loaded,
                "every tracked target was invalidated this pass"
            );
        }

        self.store.save(&survivors).await;

        info!(
            loaded = report.loaded,
            kept = report.kept,
            pruned = report.pruned,
            render_failures = report.render_failures,
            "reconciliation pass complete"
        );
        report
    }

    // A panicking renderer counts as a failed call; it must not take the loop down.
    async fn resolve(&self, target: &DisplayTarget) -> Result<SurfaceState, RenderError> {
        AssertUnwindSafe(self.renderer.resolve(target))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(RenderError::Lookup("renderer panicked".into())))
    }

    async fn push(&self, target: &DisplayTarget, snapshot: &ServerSnapshot) -> Result<(), RenderError> {
        AssertUnwindSafe(self.renderer.push(target, snapshot))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(RenderError::Failed("renderer panicked".into())))
    }

    /// The list to persist at the end of a pass: whatever the store holds now
    /// minus the records this pass pruned. Re-reading keeps registrations
    /// made while the pass was running; a record that was re-registered for a
    /// pruned surface differs from the pruned one and survives.
    async fn survivors(&self, pruned: &[DisplayTarget]) -> Vec<DisplayTarget> {
        let current = self.store.load().await.targets;
        if pruned.is_empty() {
            return current;
        }
        current
            .into_iter()
            .filter(|t| !pruned.contains(t))
            .collect()
    }

    /// Track `target`, replacing any existing target for the same surface,
    /// and push its status right away.
    pub async fn register(&self, mut target: DisplayTarget) -> Result<Registration, RegistrationError> {
        validation::validate_surface_id(target.id.as_str()).map_err(RegistrationError::InvalidSurface)?;
        validation::validate_server(&target.server).map_err(RegistrationError::InvalidServer)?;
        target.server.host = target.server.normalized_host();

        let mut targets = self.store.load().await.targets;
        let before = targets.len();
        targets.retain(|t| t.id != target.id);
        let replaced = targets.len() != before;
        targets.push(target.clone());
        self.store.save(&targets).await;

        info!(surface = %target.id, server = %target.server, replaced, "target registered");

        let snapshot = self.cache.get(&target.server).await;
        if let Err(e) = self.push(&target, &snapshot).await {
            warn!(surface = %target.id, error = %e, "initial status render failed");
        }

        Ok(Registration { replaced, snapshot })
    }

    /// Stop tracking a surface. Returns whether anything was removed.
    pub async fn unregister(&self, id: &SurfaceId) -> bool {
        let mut targets = self.store.load().await.targets;
        let before = targets.len();
        targets.retain(|t| &t.id != id);
        if targets.len() == before {
            return false;
        }
        self.store.save(&targets).await;
        info!(surface = %id, "target unregistered");
        true
    }

    /// Surfaces currently tracked, in stored order.
    pub async fn tracked(&self) -> Vec<DisplayTarget> {
        self.store.load().await.targets
    }
}
