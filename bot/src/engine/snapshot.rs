use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which flavour of game server sits behind an address. The two editions
/// speak different status protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    #[default]
    Java,
    Bedrock,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerKind::Java => "java",
            ServerKind::Bedrock => "bedrock",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "java" => Ok(ServerKind::Java),
            "bedrock" => Ok(ServerKind::Bedrock),
            other => Err(format!("unknown server kind: {other}")),
        }
    }
}

/// Where a game server lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub kind: ServerKind,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16, kind: ServerKind) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
        }
    }

    /// Host with any pasted URL decoration removed.
    pub fn normalized_host(&self) -> String {
        normalize_host(&self.host)
    }

    pub fn request_key(&self) -> RequestKey {
        RequestKey::from(self)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.kind)
    }
}

/// Strip a leading `http://` or `https://` and anything after the first `/`.
/// Operators regularly paste a URL where a hostname is expected.
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let without_scheme = if lower.starts_with("https://") {
        &trimmed["https://".len()..]
    } else if lower.starts_with("http://") {
        &trimmed["http://".len()..]
    } else {
        trimmed
    };
    without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Coalescing key for in-flight probes: `host:port:kind`, host normalized and
/// lowercased so cosmetic differences in stored records share one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&ServerAddress> for RequestKey {
    fn from(server: &ServerAddress) -> Self {
        RequestKey(format!(
            "{}:{}:{}",
            normalize_host(&server.host).to_ascii_lowercase(),
            server.port,
            server.kind
        ))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A player reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerCounts {
    pub online: u32,
    pub max: u32,
    pub list: Vec<PlayerRef>,
}

/// Immutable result of one probe. Shared between callers as
/// `Arc<ServerSnapshot>`; a new fetch always produces a new value.
///
/// Fields are private so the only way to build one is through the
/// constructors below, which keep `online` and `error` mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSnapshot {
    online: bool,
    players: PlayerCounts,
    motd: Option<String>,
    version: Option<String>,
    fetched_at: DateTime<Utc>,
    error: Option<String>,
}

impl ServerSnapshot {
    /// A reachable server that counts as online.
    pub fn online(players: PlayerCounts, motd: Option<String>, version: Option<String>) -> Self {
        Self {
            online: true,
            players,
            motd,
            version,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    /// The probe succeeded but the server does not count as online (not
    /// reachable, or zero capacity under the capacity policy). No error text.
    pub fn reachable_but_offline(motd: Option<String>, version: Option<String>) -> Self {
        Self {
            online: false,
            players: PlayerCounts::default(),
            motd,
            version,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    /// The probe failed.
    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            online: false,
            players: PlayerCounts::default(),
            motd: None,
            version: None,
            fetched_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn players(&self) -> &PlayerCounts {
        &self.players
    }

    pub fn motd(&self) -> Option<&str> {
        self.motd.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
