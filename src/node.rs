use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::AgentConfig;
use crate::coordinator::Coordinator;
use crate::error::{CoordError, Result};
use crate::instruction::{self, InstructionDispatcher, InstructionReceiver};
use crate::state::{InMemoryStateStore, StateStore};
use crate::telemetry::TelemetrySink;
use crate::topology::{resolve_role, EndpointBindings, Role, TopologyProvider};
use crate::workload::{ProcessExecutor, ProcessOutput, WorkloadCatalog};

/// One host's coordination agent: the state API, the instruction dispatcher
/// (primary only) and the role coordinator.
pub struct Agent {
    config: AgentConfig,
    role: Role,
    store: Arc<InMemoryStateStore>,
    receiver: InstructionReceiver,
    coordinator: Coordinator,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Agent {
    /// Resolve this host's role, bind peer endpoints and the API listener.
    pub async fn bind(
        config: AgentConfig,
        topology: &dyn TopologyProvider,
        catalog: WorkloadCatalog,
        executor: Arc<dyn ProcessExecutor>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let hosts = topology.hosts()?;
        let role = resolve_role(&hosts, &config.host_id)?;

        let (inbox, receiver) = instruction::channel(config.coordinator.instruction_queue_capacity);
        let store = Arc::new(InMemoryStateStore::with_inbox(inbox));
        let local: Arc<dyn StateStore> = store.clone();

        let bindings = EndpointBindings::resolve(
            role,
            &hosts,
            local,
            config.api_port,
            config.coordinator.request_timeout(),
        )?;
        let coordinator = Coordinator::new(
            role,
            bindings,
            executor,
            Arc::new(catalog),
            telemetry,
            config.coordinator.clone(),
        )?;

        let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
            CoordError::Config(format!("failed to bind {}: {}", config.listen_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CoordError::Config(format!("failed to read listener address: {}", e)))?;

        tracing::info!(
            host_id = %config.host_id,
            role = %role,
            addr = %local_addr,
            hosts = hosts.len(),
            "Agent bound"
        );

        Ok(Self {
            config,
            role,
            store,
            receiver,
            coordinator,
            listener,
            local_addr,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> Arc<InMemoryStateStore> {
        self.store.clone()
    }

    /// Run the agent.
    ///
    /// With a workload on a secondary or single-host agent, coordinates that
    /// workload and returns the client's output once the final reset is done.
    /// Otherwise serves the API (and, on a primary, dispatches instructions)
    /// until `cancel` fires and returns `None`.
    pub async fn run(
        self,
        workload: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Option<ProcessOutput>> {
        let Agent {
            config,
            role,
            store,
            receiver,
            coordinator,
            listener,
            local_addr: _,
        } = self;

        let services = CancellationToken::new();

        let api_state = ApiState::new(store);
        let api_token = services.clone();
        let api_handle = tokio::spawn(async move {
            if let Err(e) = api::serve(listener, api_state, api_token).await {
                tracing::error!(error = %e, "State API server failed");
            }
        });

        let dispatcher_handle = coordinator.primary().map(|primary| {
            let dispatcher = InstructionDispatcher::new(receiver, primary);
            tokio::spawn(dispatcher.run(services.clone()))
        });

        let outcome = match (role, workload) {
            (Role::Secondary | Role::Unassigned, Some(workload_id)) => {
                let result = coordinator.run_workload(&workload_id, &cancel).await;
                match &result {
                    Ok(output) => {
                        tracing::info!(
                            host_id = %config.host_id,
                            workload_id = %workload_id,
                            exit_code = ?output.exit_code,
                            "Workload completed"
                        )
                    }
                    Err(e) => {
                        tracing::error!(
                            host_id = %config.host_id,
                            workload_id = %workload_id,
                            error = %e,
                            "Workload failed"
                        )
                    }
                }
                result.map(Some)
            }
            (Role::Primary, Some(workload_id)) => {
                tracing::warn!(
                    workload_id = %workload_id,
                    "Primary host ignores --workload and waits for instructions"
                );
                cancel.cancelled().await;
                Ok(None)
            }
            (_, None) => {
                cancel.cancelled().await;
                Ok(None)
            }
        };

        services.cancel();
        if let Some(handle) = dispatcher_handle {
            match handle.await {
                Ok(handled) => tracing::info!(handled, "Instruction dispatcher stopped"),
                Err(e) => tracing::error!(error = %e, "Instruction dispatcher task failed"),
            }
        }
        if let Err(e) = api_handle.await {
            tracing::error!(error = %e, "State API task failed");
        }

        outcome
    }
}
