use async_trait::async_trait;

use super::snapshot::{PlayerRef, ServerKind};

/// Raw answer from a status endpoint, before any online/offline policy is
/// applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStatus {
    pub reachable: bool,
    pub players_online: u32,
    pub players_max: u32,
    pub players: Vec<PlayerRef>,
    pub version: Option<String>,
    pub motd: Option<String>,
}

/// Failure classes a probe can report. Only `RateLimited` is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Too Many Requests")]
    RateLimited,
    #[error("timed out")]
    Timeout,
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProbeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::RateLimited)
    }
}

/// Asks a remote game server for its status.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, kind: ServerKind) -> Result<RawStatus, ProbeError>;
}
