use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::PrimaryPhase;
use crate::error::{CoordError, Result};
use crate::instruction::{Instruction, InstructionHandler, InstructionType};
use crate::state::document::OUTPUT_PROPERTY;
use crate::state::{started_document_id, Document, State, StateStore, WorkloadState};
use crate::telemetry::{PhaseEvent, TelemetrySink};
use crate::topology::Role;
use crate::workload::{ProcessExecutor, WorkloadCatalog, WorkloadDefinition};

/// The authoritative side of a workload phase.
///
/// Start and reset are serialized by one mutex over the set of running
/// workloads, so concurrent instructions never interleave their side effects.
/// Both operations begin with a stop, which makes repeated instructions
/// idempotent. A workload without a stop command cannot be stopped: it stays in
/// the running set once launched, and a later start re-publishes its state
/// instead of launching a second instance.
pub struct PrimaryRole {
    role: Role,
    local: Arc<dyn StateStore>,
    executor: Arc<dyn ProcessExecutor>,
    catalog: Arc<WorkloadCatalog>,
    telemetry: Arc<dyn TelemetrySink>,
    /// Launched workloads and the trimmed stdout of their start command.
    running: Mutex<HashMap<String, String>>,
}

impl PrimaryRole {
    pub fn new(
        local: Arc<dyn StateStore>,
        executor: Arc<dyn ProcessExecutor>,
        catalog: Arc<WorkloadCatalog>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            role: Role::Primary,
            local,
            executor,
            catalog,
            telemetry,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Role reported in telemetry (single-host mode runs this in-process).
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn local_store(&self) -> &Arc<dyn StateStore> {
        &self.local
    }

    pub async fn is_running(&self, workload_id: &str) -> bool {
        self.running.lock().await.contains_key(workload_id)
    }

    /// Stop and clear any previous instance, launch the workload, then publish
    /// its "started" document. The document is only written after the launch
    /// succeeded.
    pub async fn start(&self, workload_id: &str, cancel: &CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        let definition = self.catalog.get(workload_id)?;
        let run_id = Uuid::new_v4();

        self.record(run_id, workload_id, PrimaryPhase::Starting);

        if definition.server.stop.is_none() {
            if let Some(output) = running.get(workload_id) {
                tracing::info!(workload_id, "Workload already running, re-publishing its state");
                self.publish(definition, workload_id, output).await?;
                self.record(run_id, workload_id, PrimaryPhase::Running);
                return Ok(());
            }
        }

        self.stop_locked(&mut running, workload_id, cancel).await?;

        tracing::info!(workload_id, "Starting workload");
        let output = self
            .executor
            .run(&definition.server.start, cancel)
            .await?
            .ensure_success(workload_id)?;
        let output = output.stdout.trim().to_string();
        running.insert(workload_id.to_string(), output.clone());

        let warm_up = definition.server.warm_up();
        if !warm_up.is_zero() {
            tracing::info!(workload_id, warm_up = ?warm_up, "Waiting for workload warm-up");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoordError::Cancelled),
                _ = tokio::time::sleep(warm_up) => {}
            }
        }

        self.publish(definition, workload_id, &output).await?;
        self.record(run_id, workload_id, PrimaryPhase::Running);
        Ok(())
    }

    /// Stop the workload (no-op if it is not running) and delete the documents it owns.
    pub async fn reset(&self, workload_id: &str, cancel: &CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        let run_id = Uuid::new_v4();

        self.record(run_id, workload_id, PrimaryPhase::Stopping);
        self.stop_locked(&mut running, workload_id, cancel).await?;
        self.record(run_id, workload_id, PrimaryPhase::Idle);
        Ok(())
    }

    async fn stop_locked(
        &self,
        running: &mut HashMap<String, String>,
        workload_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let definition = self.catalog.get(workload_id).ok();

        match definition.and_then(|d| d.server.stop.as_ref()) {
            Some(stop) => {
                tracing::info!(workload_id, "Stopping workload");
                self.executor
                    .run(stop, cancel)
                    .await?
                    .ensure_success(workload_id)?;
                running.remove(workload_id);
            }
            None if definition.is_none() => {
                running.remove(workload_id);
            }
            None if running.contains_key(workload_id) => {
                tracing::warn!(workload_id, "No stop command configured, workload keeps running");
            }
            None => {}
        }

        // The started document goes last: its absence is what peers wait on.
        if let Some(output_id) = definition.and_then(|d| d.server.publish_output.as_ref()) {
            self.local.delete(output_id).await?;
        }
        self.local.delete(&started_document_id(workload_id)).await?;
        Ok(())
    }

    /// Auxiliary output first, the started document last.
    async fn publish(
        &self,
        definition: &WorkloadDefinition,
        workload_id: &str,
        output: &str,
    ) -> Result<()> {
        if let Some(output_id) = &definition.server.publish_output {
            let state = State::new().with(OUTPUT_PROPERTY, output);
            let doc = Document::new(output_id.clone(), &state)?;
            self.local.upsert(&doc).await?;
        }
        self.local
            .upsert(&WorkloadState::started(workload_id).to_document()?)
            .await
    }

    fn record(&self, run_id: Uuid, workload_id: &str, phase: PrimaryPhase) {
        self.telemetry
            .record(&PhaseEvent::new(run_id, self.role, workload_id, phase.into(), 1));
    }
}

#[async_trait]
impl InstructionHandler for PrimaryRole {
    async fn handle(&self, instruction: Instruction, cancel: &CancellationToken) -> Result<()> {
        let workload_id = instruction.workload_id()?;
        match instruction.kind {
            InstructionType::StartExecution => self.start(workload_id, cancel).await,
            InstructionType::Reset => self.reset(workload_id, cancel).await,
        }
    }
}
