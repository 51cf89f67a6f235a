use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordError, Result};
use crate::workload::ProcessSpec;

/// Primary side of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerWorkload {
    /// Launches the workload. Must return once it is up (e.g. a detached service).
    pub start: ProcessSpec,
    /// Stops any running instance. Run on every reset, so it must be a no-op
    /// when nothing is running.
    #[serde(default)]
    pub stop: Option<ProcessSpec>,
    /// Delay after a successful start before readiness is published.
    #[serde(default)]
    pub warm_up_ms: u64,
    /// Document ID under which the start command's stdout is published.
    #[serde(default)]
    pub publish_output: Option<String>,
}

impl ServerWorkload {
    pub fn warm_up(&self) -> Duration {
        Duration::from_millis(self.warm_up_ms)
    }
}

/// Secondary side of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientWorkload {
    pub run: ProcessSpec,
    /// Local cleanup run before requesting a start and again on teardown.
    #[serde(default)]
    pub cleanup: Option<ProcessSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDefinition {
    pub id: String,
    pub server: ServerWorkload,
    pub client: ClientWorkload,
}

impl WorkloadDefinition {
    pub fn new(id: impl Into<String>, start: ProcessSpec, run: ProcessSpec) -> Self {
        Self {
            id: id.into(),
            server: ServerWorkload {
                start,
                stop: None,
                warm_up_ms: 0,
                publish_output: None,
            },
            client: ClientWorkload { run, cleanup: None },
        }
    }

    pub fn with_stop(mut self, stop: ProcessSpec) -> Self {
        self.server.stop = Some(stop);
        self
    }

    pub fn with_warm_up_ms(mut self, warm_up_ms: u64) -> Self {
        self.server.warm_up_ms = warm_up_ms;
        self
    }

    pub fn with_published_output(mut self, document_id: impl Into<String>) -> Self {
        self.server.publish_output = Some(document_id.into());
        self
    }

    pub fn with_client_cleanup(mut self, cleanup: ProcessSpec) -> Self {
        self.client.cleanup = Some(cleanup);
        self
    }
}

/// Workloads known to this agent, keyed by workload ID.
#[derive(Debug, Clone, Default)]
pub struct WorkloadCatalog {
    workloads: HashMap<String, WorkloadDefinition>,
}

impl WorkloadCatalog {
    pub fn new(definitions: Vec<WorkloadDefinition>) -> Self {
        Self {
            workloads: definitions
                .into_iter()
                .map(|def| (def.id.clone(), def))
                .collect(),
        }
    }

    /// Load a JSON array of workload definitions.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoordError::Config(format!("failed to read workloads {}: {}", path.display(), e))
        })?;
        let definitions: Vec<WorkloadDefinition> = serde_json::from_str(&raw).map_err(|e| {
            CoordError::Config(format!("invalid workloads {}: {}", path.display(), e))
        })?;
        Ok(Self::new(definitions))
    }

    pub fn get(&self, workload_id: &str) -> Result<&WorkloadDefinition> {
        self.workloads
            .get(workload_id)
            .ok_or_else(|| CoordError::UnknownWorkload(workload_id.to_string()))
    }

    pub fn insert(&mut self, definition: WorkloadDefinition) {
        self.workloads.insert(definition.id.clone(), definition);
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workloads.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
