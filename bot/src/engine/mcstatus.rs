use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::probe::{ProbeError, RawStatus, StatusProbe};
use super::snapshot::{PlayerRef, ServerKind};

pub const DEFAULT_API_BASE: &str = "https://api.mcstatus.io/v2";

/// [`StatusProbe`] backed by the mcstatus.io HTTP API, which pings the game
/// server on our behalf and answers with JSON.
pub struct McStatusProbe {
    client: reqwest::Client,
    base_url: String,
}

impl McStatusProbe {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("statusync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn status_url(&self, host: &str, port: u16, kind: ServerKind) -> String {
        format!(
            "{}/status/{}/{}:{}",
            self.base_url.trim_end_matches('/'),
            kind,
            urlencoding::encode(host),
            port
        )
    }
}

#[async_trait]
impl StatusProbe for McStatusProbe {
    async fn probe(&self, host: &str, port: u16, kind: ServerKind) -> Result<RawStatus, ProbeError> {
        let url = self.status_url(host, port, kind);
        debug!(%url, "querying status API");

        let resp = self.client.get(&url).send().await.map_err(classify_transport)?;
        check_status(resp.status())?;
        let body = resp.text().await.map_err(classify_transport)?;
        parse_status(&body)
    }
}

fn classify_transport(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Unreachable(e.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), ProbeError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProbeError::RateLimited);
    }
    if !status.is_success() {
        return Err(ProbeError::Protocol(format!("status API returned HTTP {status}")));
    }
    Ok(())
}

#[derive(Deserialize)]
struct StatusResponse {
    online: bool,
    #[serde(default)]
    version: Option<VersionInfo>,
    #[serde(default)]
    players: Option<PlayersInfo>,
    #[serde(default)]
    motd: Option<MotdInfo>,
}

// Java reports `name_clean`; Bedrock reports a plain `name`.
#[derive(Deserialize)]
struct VersionInfo {
    #[serde(default)]
    name_clean: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct PlayersInfo {
    #[serde(default)]
    online: u32,
    #[serde(default)]
    max: u32,
    #[serde(default)]
    list: Vec<PlayerEntry>,
}

#[derive(Deserialize)]
struct PlayerEntry {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name_clean: Option<String>,
}

#[derive(Deserialize)]
struct MotdInfo {
    #[serde(default)]
    clean: Option<String>,
}

/// Decode a status API response body.
pub fn parse_status(body: &str) -> Result<RawStatus, ProbeError> {
    let resp: StatusResponse = serde_json::from_str(body)
        .map_err(|e| ProbeError::Protocol(format!("malformed status response: {e}")))?;

    let players = resp.players.unwrap_or(PlayersInfo {
        online: 0,
        max: 0,
        list: Vec::new(),
    });

    Ok(RawStatus {
        reachable: resp.online,
        players_online: players.online,
        players_max: players.max,
        players: players
            .list
            .into_iter()
            .filter_map(|p| {
                p.name_clean.map(|name| PlayerRef {
                    name,
                    uuid: p.uuid,
                })
            })
            .collect(),
        version: resp.version.and_then(|v| v.name_clean.or(v.name)),
        motd: resp.motd.and_then(|m| m.clean),
    })
}
