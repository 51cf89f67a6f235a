//! Typed instructions pushed from a secondary to a primary.
//!
//! An instruction travels as an ordinary state document under the reserved
//! [`INSTRUCTIONS_ID`], upserted into the receiving host's store:
//!
//! ```json
//! { "id": "instructions",
//!   "definition": { "type": "StartExecution", "properties": { "workloadId": "svcA" } } }
//! ```
//!
//! Sending only guarantees delivery. Processing is confirmed separately by the
//! primary publishing (or deleting) the workload's "started" document.

pub mod dispatcher;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{CoordError, Result};
use crate::state::{Document, StateStore};

pub use dispatcher::{
    channel, InstructionDispatcher, InstructionHandler, InstructionInbox, InstructionReceiver,
};

pub const INSTRUCTIONS_ID: &str = "instructions";
pub const WORKLOAD_ID_PROPERTY: &str = "workloadId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionType {
    StartExecution,
    Reset,
}

impl fmt::Display for InstructionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionType::StartExecution => write!(f, "StartExecution"),
            InstructionType::Reset => write!(f, "Reset"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(rename = "type")]
    pub kind: InstructionType,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Instruction {
    pub fn new(kind: InstructionType, workload_id: impl Into<String>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            WORKLOAD_ID_PROPERTY.to_string(),
            Value::String(workload_id.into()),
        );
        Self { kind, properties }
    }

    pub fn start_execution(workload_id: impl Into<String>) -> Self {
        Self::new(InstructionType::StartExecution, workload_id)
    }

    pub fn reset(workload_id: impl Into<String>) -> Self {
        Self::new(InstructionType::Reset, workload_id)
    }

    pub fn workload_id(&self) -> Result<&str> {
        self.properties
            .get(WORKLOAD_ID_PROPERTY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoordError::InvalidDocument {
                document: INSTRUCTIONS_ID.to_string(),
                source: serde::de::Error::custom(format!(
                    "{} instruction is missing '{}'",
                    self.kind, WORKLOAD_ID_PROPERTY
                )),
            })
    }

    pub fn to_document(&self) -> Result<Document> {
        Document::new(INSTRUCTIONS_ID, self)
    }
}

/// Writes instructions into a receiving host's store.
#[derive(Clone)]
pub struct InstructionSender {
    store: Arc<dyn StateStore>,
}

impl InstructionSender {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn send(&self, instruction: &Instruction, cancel: &CancellationToken) -> Result<()> {
        let doc = instruction.to_document()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoordError::Cancelled),
            result = self.store.upsert(&doc) => {
                result?;
                tracing::debug!(
                    endpoint = self.store.endpoint(),
                    instruction = %instruction.kind,
                    "Instruction delivered"
                );
                Ok(())
            }
        }
    }
}
