use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoordError, Result};

/// A named JSON document: the only coordination medium between hosts.
///
/// Writes fully replace prior content; there is no versioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub definition: Value,
}

impl Document {
    pub fn new<T: Serialize>(id: impl Into<String>, definition: &T) -> Result<Self> {
        let id = id.into();
        let definition = serde_json::to_value(definition).map_err(|source| {
            CoordError::InvalidDocument {
                document: id.clone(),
                source,
            }
        })?;
        Ok(Self { id, definition })
    }

    pub fn definition_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.definition.clone()).map_err(|source| {
            CoordError::InvalidDocument {
                document: self.id.clone(),
                source,
            }
        })
    }
}

/// Flat property bag carried as a document definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }
}

pub const SERVICE_NAME_PROPERTY: &str = "serviceName";
pub const SERVICE_STATE_PROPERTY: &str = "serviceState";
pub const OUTPUT_PROPERTY: &str = "output";

/// ID of the "started" document the primary publishes for a workload.
pub fn started_document_id(workload_id: &str) -> String {
    format!("workload-state-{}", workload_id)
}

/// Readiness published by the primary once a workload has launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadState {
    pub service_name: String,
    pub service_state: bool,
}

impl WorkloadState {
    pub fn started(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_state: true,
        }
    }

    pub fn to_document(&self) -> Result<Document> {
        Document::new(started_document_id(&self.service_name), &State::from(self))
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let state: State = doc.definition_as()?;
        match (
            state.get_str(SERVICE_NAME_PROPERTY),
            state.get_bool(SERVICE_STATE_PROPERTY),
        ) {
            (Some(name), Some(running)) => Ok(Self {
                service_name: name.to_string(),
                service_state: running,
            }),
            _ => Err(CoordError::InvalidDocument {
                document: doc.id.clone(),
                source: serde::de::Error::custom("missing serviceName/serviceState"),
            }),
        }
    }

    /// Predicate used when polling for start confirmation.
    pub fn confirms_started(doc: &Document, workload_id: &str) -> bool {
        matches!(
            Self::from_document(doc),
            Ok(state) if state.service_name == workload_id && state.service_state
        )
    }
}

impl From<&WorkloadState> for State {
    fn from(state: &WorkloadState) -> Self {
        State::new()
            .with(SERVICE_NAME_PROPERTY, state.service_name.clone())
            .with(SERVICE_STATE_PROPERTY, state.service_state)
    }
}
