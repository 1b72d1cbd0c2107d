use async_trait::async_trait;
use tracing::info;

use super::snapshot::ServerSnapshot;
use crate::store::DisplayTarget;

/// Whether a target's rendering surface still exists upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Present,
    /// Confirmed deleted. The target is pruned.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("surface lookup failed: {0}")]
    Lookup(String),
    #[error("render failed: {0}")]
    Failed(String),
}

/// Pushes snapshots onto rendering surfaces. Formatting lives entirely on
/// the implementor's side.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Look up the target's surface. An `Err` means the lookup itself failed
    /// and says nothing about whether the surface exists.
    async fn resolve(&self, target: &DisplayTarget) -> Result<SurfaceState, RenderError>;

    async fn push(&self, target: &DisplayTarget, snapshot: &ServerSnapshot) -> Result<(), RenderError>;
}

/// Dry-run renderer: every surface exists and every push is a log line.
#[derive(Debug, Default)]
pub struct LogRenderer;

#[async_trait]
impl Renderer for LogRenderer {
    async fn resolve(&self, _target: &DisplayTarget) -> Result<SurfaceState, RenderError> {
        Ok(SurfaceState::Present)
    }

    async fn push(&self, target: &DisplayTarget, snapshot: &ServerSnapshot) -> Result<(), RenderError> {
        info!(
            surface = %target.id,
            server = %target.server,
            name = %target.last_known_name,
            online = snapshot.is_online(),
            players = snapshot.players().online,
            max = snapshot.players().max,
            version = snapshot.version().unwrap_or("-"),
            error = snapshot.error().unwrap_or("-"),
            "status display updated"
        );
        Ok(())
    }
}
