use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::coordinator::Phase;
use crate::topology::Role;

/// A coordination phase transition.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseEvent {
    /// Correlates every event of one coordinated run across retries.
    pub run_id: Uuid,
    pub role: Role,
    pub workload_id: String,
    pub phase: Phase,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

impl PhaseEvent {
    pub fn new(run_id: Uuid, role: Role, workload_id: &str, phase: Phase, attempt: u32) -> Self {
        Self {
            run_id,
            role,
            workload_id: workload_id.to_string(),
            phase,
            attempt,
            at: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Fire-and-forget receiver of phase transitions.
///
/// Implementations must not block and cannot fail the protocol.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &PhaseEvent);
}

/// Emits each phase transition as a `tracing` event.
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &PhaseEvent) {
        tracing::info!(
            target: "fleet_coord::phase",
            run_id = %event.run_id,
            role = %event.role,
            workload_id = %event.workload_id,
            phase = %event.phase,
            attempt = event.attempt,
            detail = event.detail.as_deref().unwrap_or(""),
            "Phase transition"
        );
    }
}
