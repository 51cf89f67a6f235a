use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::coordinator::{Phase, SecondaryPhase};
use crate::error::Result;
use crate::instruction::{Instruction, InstructionSender};
use crate::retry::RetryPolicy;
use crate::state::document::OUTPUT_PROPERTY;
use crate::state::{started_document_id, State, StatePoller, StateStore, WorkloadState};
use crate::telemetry::{PhaseEvent, TelemetrySink};
use crate::topology::Role;
use crate::workload::{ProcessExecutor, ProcessOutput, WorkloadCatalog, WorkloadDefinition};

/// Environment variable carrying the primary's published output to the client process.
pub const PRIMARY_OUTPUT_ENV: &str = "FLEET_COORD_PRIMARY_OUTPUT";

/// Drives one workload against a remote primary.
///
/// Every attempt runs the full sequence: wait for the peer, reset it, confirm
/// the reset, request a start, confirm the start, run the local client. A
/// final reset is sent after the client phase whether it succeeded or not.
pub struct SecondaryRole {
    peer: Arc<dyn StateStore>,
    sender: InstructionSender,
    poller: StatePoller,
    executor: Arc<dyn ProcessExecutor>,
    catalog: Arc<WorkloadCatalog>,
    telemetry: Arc<dyn TelemetrySink>,
    config: CoordinatorConfig,
    retry: RetryPolicy,
}

impl SecondaryRole {
    pub fn new(
        peer: Arc<dyn StateStore>,
        executor: Arc<dyn ProcessExecutor>,
        catalog: Arc<WorkloadCatalog>,
        telemetry: Arc<dyn TelemetrySink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            sender: InstructionSender::new(peer.clone()),
            poller: StatePoller::new(config.poll_interval()),
            retry: RetryPolicy::from_config(&config.retry),
            peer,
            executor,
            catalog,
            telemetry,
            config,
        }
    }

    pub fn peer(&self) -> &Arc<dyn StateStore> {
        &self.peer
    }

    /// Coordinate one workload with the primary and return the client's output.
    pub async fn run(
        &self,
        workload_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let definition = self.catalog.get(workload_id)?;
        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            workload_id,
            endpoint = self.peer.endpoint(),
            "Coordinating workload with primary"
        );

        let result = self
            .retry
            .run(cancel, |attempt| self.run_once(definition, run_id, attempt, cancel))
            .await;

        let detail = result.as_ref().err().map(ToString::to_string);
        self.record(run_id, workload_id, SecondaryPhase::Idle, 0, detail);
        result
    }

    async fn run_once(
        &self,
        definition: &WorkloadDefinition,
        run_id: Uuid,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let id = definition.id.as_str();

        self.record(run_id, id, SecondaryPhase::AwaitingPeerOnline, attempt, None);
        let phase = Phase::Secondary(SecondaryPhase::AwaitingPeerOnline);
        let online_timeout = self.config.peer_online_timeout();
        self.poller
            .poll_for_heartbeat(self.peer.as_ref(), online_timeout, cancel)
            .await
            .map_err(|e| e.during(phase))?;
        self.poller
            .poll_for_online(self.peer.as_ref(), online_timeout, cancel)
            .await
            .map_err(|e| e.during(phase))?;

        self.reset_peer(definition, run_id, attempt, cancel).await?;
        run_cleanup(self.executor.as_ref(), definition, cancel).await;

        let outcome = self.start_and_execute(definition, run_id, attempt, cancel).await;
        self.final_reset(definition, run_id, attempt).await;
        outcome
    }

    async fn reset_peer(
        &self,
        definition: &WorkloadDefinition,
        run_id: Uuid,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = definition.id.as_str();

        self.record(run_id, id, SecondaryPhase::RequestingReset, attempt, None);
        self.sender
            .send(&Instruction::reset(id), cancel)
            .await
            .map_err(|e| e.during(Phase::Secondary(SecondaryPhase::RequestingReset)))?;

        self.record(run_id, id, SecondaryPhase::AwaitingResetConfirmed, attempt, None);
        self.poller
            .poll_until_absent(
                self.peer.as_ref(),
                &started_document_id(id),
                self.config.state_timeout(),
                cancel,
            )
            .await
            .map_err(|e| e.during(Phase::Secondary(SecondaryPhase::AwaitingResetConfirmed)))
    }

    async fn start_and_execute(
        &self,
        definition: &WorkloadDefinition,
        run_id: Uuid,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let id = definition.id.as_str();

        self.record(run_id, id, SecondaryPhase::RequestingStart, attempt, None);
        self.sender
            .send(&Instruction::start_execution(id), cancel)
            .await
            .map_err(|e| e.during(Phase::Secondary(SecondaryPhase::RequestingStart)))?;

        self.record(run_id, id, SecondaryPhase::AwaitingStartConfirmed, attempt, None);
        self.poller
            .poll_until_match(
                self.peer.as_ref(),
                &started_document_id(id),
                |doc| WorkloadState::confirms_started(doc, id),
                self.config.state_timeout(),
                cancel,
            )
            .await
            .map_err(|e| e.during(Phase::Secondary(SecondaryPhase::AwaitingStartConfirmed)))?;

        self.record(run_id, id, SecondaryPhase::Running, attempt, None);
        run_client(self.executor.as_ref(), self.peer.as_ref(), definition, cancel).await
    }

    /// Best-effort teardown under its own cancellation scope, bounded by the
    /// cleanup timeout. Failures are logged and never replace the outcome.
    async fn final_reset(&self, definition: &WorkloadDefinition, run_id: Uuid, attempt: u32) {
        let id = definition.id.as_str();
        self.record(run_id, id, SecondaryPhase::FinalReset, attempt, None);

        let scope = CancellationToken::new();
        let timeout = self.config.cleanup_timeout();
        let teardown = async {
            run_cleanup(self.executor.as_ref(), definition, &scope).await;
            self.sender.send(&Instruction::reset(id), &scope).await?;
            self.poller
                .poll_until_absent(self.peer.as_ref(), &started_document_id(id), timeout, &scope)
                .await
        };

        match tokio::time::timeout(timeout, teardown).await {
            Ok(Ok(())) => tracing::info!(workload_id = id, "Primary reset after run"),
            Ok(Err(e)) => {
                tracing::warn!(workload_id = id, error = %e, "Final reset did not complete")
            }
            Err(_) => {
                scope.cancel();
                tracing::warn!(workload_id = id, timeout = ?timeout, "Final reset timed out");
            }
        }
    }

    fn record(
        &self,
        run_id: Uuid,
        workload_id: &str,
        phase: SecondaryPhase,
        attempt: u32,
        detail: Option<String>,
    ) {
        let mut event =
            PhaseEvent::new(run_id, Role::Secondary, workload_id, phase.into(), attempt);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.telemetry.record(&event);
    }
}

/// Run the client side of a workload, passing along any output the primary
/// published for it.
pub(crate) async fn run_client(
    executor: &dyn ProcessExecutor,
    primary: &dyn StateStore,
    definition: &WorkloadDefinition,
    cancel: &CancellationToken,
) -> Result<ProcessOutput> {
    let mut spec = definition.client.run.clone();

    if let Some(output_id) = &definition.server.publish_output {
        if let Some(doc) = primary.get(output_id).await? {
            let state: State = doc.definition_as()?;
            if let Some(output) = state.get_str(OUTPUT_PROPERTY) {
                spec.env.insert(PRIMARY_OUTPUT_ENV.to_string(), output.to_string());
            }
        }
    }

    tracing::info!(
        workload_id = %definition.id,
        command = %spec.command_line(),
        "Running client workload"
    );
    executor
        .run(&spec, cancel)
        .await?
        .ensure_success(&definition.id)
}

/// Run the local cleanup command, if any. Failures are logged only.
pub(crate) async fn run_cleanup(
    executor: &dyn ProcessExecutor,
    definition: &WorkloadDefinition,
    cancel: &CancellationToken,
) {
    let Some(cleanup) = &definition.client.cleanup else {
        return;
    };
    match executor.run(cleanup, cancel).await {
        Ok(output) if output.success() => {}
        Ok(output) => tracing::warn!(
            workload_id = %definition.id,
            exit_code = ?output.exit_code,
            "Client cleanup exited unsuccessfully"
        ),
        Err(e) => tracing::warn!(workload_id = %definition.id, error = %e, "Client cleanup failed"),
    }
}
