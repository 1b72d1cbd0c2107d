//! Scripted collaborators shared by unit and integration tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::probe::{ProbeError, RawStatus, StatusProbe};
use super::renderer::{RenderError, Renderer, SurfaceState};
use super::snapshot::{ServerKind, ServerSnapshot};
use crate::store::{DisplayTarget, SurfaceId};

pub fn raw_online(online: u32, max: u32) -> RawStatus {
    RawStatus {
        reachable: true,
        players_online: online,
        players_max: max,
        players: Vec::new(),
        version: Some("1.21.4".into()),
        motd: Some("A Minecraft Server".into()),
    }
}

/// Replays a script of results, then repeats `fallback` forever.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Result<RawStatus, ProbeError>>>,
    fallback: Result<RawStatus, ProbeError>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    hosts: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn always(result: Result<RawStatus, ProbeError>) -> Self {
        Self::with_script(Vec::new(), result)
    }

    pub fn with_script(
        script: Vec<Result<RawStatus, ProbeError>>,
        fallback: Result<RawStatus, ProbeError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            hosts: Mutex::new(Vec::new()),
        }
    }

    /// Each call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Each call consumes one permit before answering.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusProbe for ScriptedProbe {
    async fn probe(&self, host: &str, _port: u16, _kind: ServerKind) -> Result<RawStatus, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.hosts.lock().unwrap().push(host.to_string());

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Records pushes; surfaces can be marked missing, unresolvable or failing.
#[derive(Default)]
pub struct RecordingRenderer {
    missing: Mutex<HashSet<SurfaceId>>,
    lookup_failures: Mutex<HashSet<SurfaceId>>,
    push_failures: Mutex<HashSet<SurfaceId>>,
    resolve_panics: Mutex<HashSet<SurfaceId>>,
    push_panics: Mutex<HashSet<SurfaceId>>,
    pushes: Mutex<Vec<(SurfaceId, ServerSnapshot)>>,
    resolves: AtomicUsize,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_missing(&self, id: &str) {
        self.missing.lock().unwrap().insert(SurfaceId::new(id));
    }

    pub fn fail_lookup(&self, id: &str) {
        self.lookup_failures.lock().unwrap().insert(SurfaceId::new(id));
    }

    pub fn fail_push(&self, id: &str) {
        self.push_failures.lock().unwrap().insert(SurfaceId::new(id));
    }

    pub fn panic_on_resolve(&self, id: &str) {
        self.resolve_panics.lock().unwrap().insert(SurfaceId::new(id));
    }

    pub fn panic_on_push(&self, id: &str) {
        self.push_panics.lock().unwrap().insert(SurfaceId::new(id));
    }

    pub fn pushes(&self) -> Vec<(SurfaceId, ServerSnapshot)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn resolve(&self, target: &DisplayTarget) -> Result<SurfaceState, RenderError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.resolve_panics.lock().unwrap().contains(&target.id) {
            panic!("renderer blew up resolving {}", target.id);
        }
        if self.lookup_failures.lock().unwrap().contains(&target.id) {
            return Err(RenderError::Lookup("backend unavailable".into()));
        }
        if self.missing.lock().unwrap().contains(&target.id) {
            return Ok(SurfaceState::Missing);
        }
        Ok(SurfaceState::Present)
    }

    async fn push(&self, target: &DisplayTarget, snapshot: &ServerSnapshot) -> Result<(), RenderError> {
        self.pushes
            .lock()
            .unwrap()
            .push((target.id.clone(), snapshot.clone()));
        if self.push_panics.lock().unwrap().contains(&target.id) {
            panic!("renderer blew up pushing {}", target.id);
        }
        if self.push_failures.lock().unwrap().contains(&target.id) {
            return Err(RenderError::Failed("message edit rejected".into()));
        }
        Ok(())
    }
}
