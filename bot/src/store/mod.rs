//! Durable list of display targets.
//!
//! [`TargetStore`] is the seam the reconciliation loop talks to. The default
//! backend is [`file::FileTargetStore`], a JSON document on disk;
//! [`memory::MemoryTargetStore`] keeps everything in process.
//!
//! Neither operation can fail from the caller's point of view. A storage
//! problem degrades to "no targets tracked" on load and to a logged, dropped
//! write on save.

pub mod file;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::snapshot::ServerAddress;

/// Opaque key of a rendering surface (a message, a channel, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-target knobs handed through to the renderer untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Render player heads next to names.
    pub player_avatars: bool,
}

/// "Keep surface `id` in sync with `server`."
///
/// Records are only ever replaced whole; there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayTarget {
    pub id: SurfaceId,
    pub server: ServerAddress,
    #[serde(default)]
    pub render_options: RenderOptions,
    #[serde(default)]
    pub last_known_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetList {
    pub targets: Vec<DisplayTarget>,
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Current targets. Never fails; see the module docs.
    async fn load(&self) -> TargetList;

    /// Replace the whole target list.
    async fn save(&self, targets: &[DisplayTarget]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::snapshot::ServerKind;

    #[test]
    fn test_target_json_shape() {
        let target = DisplayTarget {
            id: SurfaceId::new("T1"),
            server: ServerAddress::new("mc.example.com", 25565, ServerKind::Java),
            render_options: RenderOptions {
                player_avatars: true,
            },
            last_known_name: "Example".into(),
        };
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["id"], "T1");
        assert_eq!(json["server"]["kind"], "java");
        assert_eq!(json["render_options"]["player_avatars"], true);
    }

    #[test]
    fn test_target_optional_fields_default() {
        let target: DisplayTarget = serde_json::from_str(
            r#"{"id":"T9","server":{"host":"mc.example.com","port":19132,"kind":"bedrock"}}"#,
        )
        .unwrap();
        assert_eq!(target.server.kind, ServerKind::Bedrock);
        assert!(!target.render_options.player_avatars);
        assert!(target.last_known_name.is_empty());
    }
}
