//! Test harness for coordination integration tests.
//!
//! Provides a scripted process executor, store wrappers for counting and
//! failure injection, a recording telemetry sink, and helpers for spawning
//! agents on ephemeral ports.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleet_coord::config::{AgentConfig, CoordinatorConfig};
use fleet_coord::coordinator::Phase;
use fleet_coord::error::{CoordError, Result};
use fleet_coord::node::Agent;
use fleet_coord::state::{Document, InMemoryStateStore, StateStore};
use fleet_coord::telemetry::{PhaseEvent, TelemetrySink};
use fleet_coord::topology::{HostEntry, Role, StaticTopology};
use fleet_coord::workload::{
    ProcessExecutor, ProcessOutput, ProcessSpec, WorkloadCatalog, WorkloadDefinition,
};

pub const SERVER_START: &str = "server-start";
pub const SERVER_STOP: &str = "server-stop";
pub const CLIENT_RUN: &str = "client-run";
pub const CLIENT_CLEANUP: &str = "client-cleanup";

/// A workload whose processes are all handled by [`RecordingExecutor`].
pub fn test_workload(id: &str) -> WorkloadDefinition {
    WorkloadDefinition::new(id, ProcessSpec::new(SERVER_START), ProcessSpec::new(CLIENT_RUN))
        .with_stop(ProcessSpec::new(SERVER_STOP))
}

pub fn test_catalog(ids: &[&str]) -> WorkloadCatalog {
    WorkloadCatalog::new(ids.iter().map(|id| test_workload(id)).collect())
}

// =============================================================================
// Process executor
// =============================================================================

#[derive(Default)]
struct Script {
    failures: HashMap<String, u32>,
    delays: HashMap<String, Duration>,
    stdout: HashMap<String, String>,
}

/// Executor that never spawns processes.
///
/// Tracks how many server instances are running (`server-start` adds one,
/// `server-stop` stops them all) and records every spec it was asked to run.
#[derive(Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<ProcessSpec>>,
    script: Mutex<Script>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `times` runs of `command` exit with code 1.
    pub fn fail(&self, command: &str, times: u32) {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(command.to_string(), times);
    }

    pub fn delay(&self, command: &str, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(command.to_string(), delay);
    }

    pub fn stdout(&self, command: &str, stdout: &str) {
        self.script
            .lock()
            .unwrap()
            .stdout
            .insert(command.to_string(), stdout.to_string());
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> Vec<ProcessSpec> {
        self.runs.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.command == command)
            .count()
    }

    pub fn commands(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.command.clone())
            .collect()
    }
}

#[async_trait]
impl ProcessExecutor for RecordingExecutor {
    async fn run(&self, spec: &ProcessSpec, cancel: &CancellationToken) -> Result<ProcessOutput> {
        self.runs.lock().unwrap().push(spec.clone());

        let (fail, delay, stdout) = {
            let mut script = self.script.lock().unwrap();
            let fail = match script.failures.get_mut(&spec.command) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (
                fail,
                script.delays.get(&spec.command).copied(),
                script.stdout.get(&spec.command).cloned().unwrap_or_default(),
            )
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CoordError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if fail {
            return Ok(ProcessOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("{} failed", spec.command),
            });
        }

        match spec.command.as_str() {
            SERVER_START => {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
            }
            SERVER_STOP => self.active.store(0, Ordering::SeqCst),
            _ => {}
        }

        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

// =============================================================================
// State store wrappers
// =============================================================================

/// Counts calls to an inner store and can fail the first N reads.
pub struct CountingStore {
    inner: Arc<dyn StateStore>,
    gets: AtomicUsize,
    upserts: Mutex<Vec<Document>>,
    failing_gets: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gets: AtomicUsize::new(0),
            upserts: Mutex::new(Vec::new()),
            failing_gets: AtomicUsize::new(0),
        })
    }

    pub fn fail_gets(&self, times: usize) {
        self.failing_gets.store(times, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> Vec<Document> {
        self.upserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateStore for CountingStore {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CoordError::transport(self.endpoint(), "connection refused"));
        }
        self.inner.get(id).await
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        self.upserts.lock().unwrap().push(doc.clone());
        self.inner.upsert(doc).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn heartbeat(&self) -> Result<bool> {
        self.inner.heartbeat().await
    }

    async fn events_online(&self) -> Result<bool> {
        self.inner.events_online().await
    }
}

// =============================================================================
// Telemetry
// =============================================================================

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<PhaseEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PhaseEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.events().into_iter().map(|e| e.phase).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: &PhaseEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// =============================================================================
// Agents
// =============================================================================

/// Coordinator timings short enough for tests.
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig::fast()
}

/// Handle to an agent running on an ephemeral port.
pub struct TestAgent {
    pub addr: SocketAddr,
    pub role: Role,
    pub store: Arc<InMemoryStateStore>,
    pub cancel: CancellationToken,
    handle: Option<JoinHandle<Result<Option<ProcessOutput>>>>,
}

impl TestAgent {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the agent's run to finish.
    pub async fn join(mut self, timeout: Duration) -> Result<Option<ProcessOutput>> {
        let handle = self.handle.take().expect("agent already joined");
        tokio::time::timeout(timeout, handle)
            .await
            .expect("agent did not finish in time")
            .expect("agent task panicked")
    }

    /// Cancel the agent and wait for it to stop.
    pub async fn shutdown(self) -> Result<Option<ProcessOutput>> {
        self.cancel.cancel();
        self.join(Duration::from_secs(5)).await
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Bind an agent on 127.0.0.1:0 and start it in the background.
#[allow(clippy::too_many_arguments)]
pub async fn spawn_agent(
    host_id: &str,
    hosts: Vec<HostEntry>,
    api_port: u16,
    catalog: WorkloadCatalog,
    executor: Arc<dyn ProcessExecutor>,
    telemetry: Arc<dyn TelemetrySink>,
    config: CoordinatorConfig,
    workload: Option<&str>,
) -> TestAgent {
    let listen_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let agent_config = AgentConfig::new(host_id, listen_addr)
        .with_api_port(api_port)
        .with_coordinator(config);

    let agent = Agent::bind(
        agent_config,
        &StaticTopology::new(hosts),
        catalog,
        executor,
        telemetry,
    )
    .await
    .expect("agent should bind");

    let addr = agent.local_addr();
    let role = agent.role();
    let store = agent.store();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(workload.map(str::to_string), cancel.clone()));

    TestAgent {
        addr,
        role,
        store,
        cancel,
        handle: Some(handle),
    }
}

/// A primary/secondary topology where both hosts are on loopback.
pub fn two_host_topology() -> Vec<HostEntry> {
    vec![
        HostEntry::new("vm-1", "127.0.0.1", Role::Primary),
        HostEntry::new("vm-2", "127.0.0.1", Role::Secondary),
    ]
}

/// Wait until `condition` holds, checking every 10ms.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
