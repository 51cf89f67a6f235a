//! Role coordination.
//!
//! A host takes one of three strategies, picked from its resolved [`Role`]:
//!
//! - [`PrimaryRole`] reacts to instructions and publishes workload state.
//! - [`SecondaryRole`] drives the reset/start/confirm/run/reset sequence
//!   against a remote primary.
//! - Single-host mode plays both sides in-process, without instructions.

pub mod phase;
pub mod primary;
pub mod secondary;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use phase::{Phase, PrimaryPhase, SecondaryPhase};
pub use primary::PrimaryRole;
pub use secondary::{SecondaryRole, PRIMARY_OUTPUT_ENV};

use crate::config::CoordinatorConfig;
use crate::error::{CoordError, Result};
use crate::telemetry::{PhaseEvent, TelemetrySink};
use crate::topology::{EndpointBindings, Role};
use crate::workload::{ProcessExecutor, ProcessOutput, WorkloadCatalog};

enum Strategy {
    Primary(Arc<PrimaryRole>),
    Secondary(SecondaryRole),
    SingleHost(Arc<PrimaryRole>),
}

/// Entry point for running workloads under the host's role.
pub struct Coordinator {
    role: Role,
    strategy: Strategy,
    executor: Arc<dyn ProcessExecutor>,
    catalog: Arc<WorkloadCatalog>,
    telemetry: Arc<dyn TelemetrySink>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        role: Role,
        bindings: EndpointBindings,
        executor: Arc<dyn ProcessExecutor>,
        catalog: Arc<WorkloadCatalog>,
        telemetry: Arc<dyn TelemetrySink>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let strategy = match role {
            Role::Primary => Strategy::Primary(Arc::new(PrimaryRole::new(
                bindings.local.clone(),
                executor.clone(),
                catalog.clone(),
                telemetry.clone(),
            ))),
            Role::Secondary => Strategy::Secondary(SecondaryRole::new(
                bindings.peer()?.clone(),
                executor.clone(),
                catalog.clone(),
                telemetry.clone(),
                config.clone(),
            )),
            Role::Unassigned => Strategy::SingleHost(Arc::new(
                PrimaryRole::new(
                    bindings.local.clone(),
                    executor.clone(),
                    catalog.clone(),
                    telemetry.clone(),
                )
                .with_role(Role::Unassigned),
            )),
        };

        Ok(Self {
            role,
            strategy,
            executor,
            catalog,
            telemetry,
            config,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The instruction handler for this host, if it plays the primary side.
    pub fn primary(&self) -> Option<Arc<PrimaryRole>> {
        match &self.strategy {
            Strategy::Primary(primary) => Some(primary.clone()),
            Strategy::Secondary(_) | Strategy::SingleHost(_) => None,
        }
    }

    /// Run `workload_id` to completion from the driving side.
    ///
    /// Only valid for secondary and single-host roles; a primary waits for
    /// instructions instead.
    pub async fn run_workload(
        &self,
        workload_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        match &self.strategy {
            Strategy::Primary(_) => Err(CoordError::Topology(format!(
                "primary host cannot drive workload '{}'; it waits for instructions",
                workload_id
            ))),
            Strategy::Secondary(secondary) => secondary.run(workload_id, cancel).await,
            Strategy::SingleHost(primary) => {
                self.run_single_host(primary, workload_id, cancel).await
            }
        }
    }

    /// Start, run, then reset on one host. The reset always runs under a fresh
    /// scope bounded by the cleanup timeout.
    async fn run_single_host(
        &self,
        primary: &PrimaryRole,
        workload_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let definition = self.catalog.get(workload_id)?;
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, workload_id, "Running workload in single-host mode");

        let outcome = async {
            primary.start(workload_id, cancel).await?;
            self.record(run_id, workload_id, SecondaryPhase::Running);
            secondary::run_client(
                self.executor.as_ref(),
                primary.local_store().as_ref(),
                definition,
                cancel,
            )
            .await
        }
        .await;

        self.record(run_id, workload_id, SecondaryPhase::FinalReset);
        let scope = CancellationToken::new();
        let timeout = self.config.cleanup_timeout();
        let teardown = async {
            secondary::run_cleanup(self.executor.as_ref(), definition, &scope).await;
            primary.reset(workload_id, &scope).await
        };
        match tokio::time::timeout(timeout, teardown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(workload_id, error = %e, "Single-host reset failed"),
            Err(_) => {
                scope.cancel();
                tracing::warn!(workload_id, timeout = ?timeout, "Single-host reset timed out");
            }
        }

        self.record(run_id, workload_id, SecondaryPhase::Idle);
        outcome
    }

    fn record(&self, run_id: Uuid, workload_id: &str, phase: SecondaryPhase) {
        self.telemetry.record(&PhaseEvent::new(
            run_id,
            self.role,
            workload_id,
            phase.into(),
            1,
        ));
    }
}
