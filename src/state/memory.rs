use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::instruction::{Instruction, InstructionInbox, INSTRUCTIONS_ID};
use crate::state::{Document, StateStore};

/// The agent's own document store, served by the state API.
///
/// When an inbox is attached, every upsert of the reserved `instructions`
/// document is parsed and forwarded to it. Malformed instruction documents are
/// rejected before they are stored.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    documents: RwLock<HashMap<String, Document>>,
    inbox: Option<InstructionInbox>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbox(inbox: InstructionInbox) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            inbox: Some(inbox),
        }
    }

    /// Store a document. Returns true if it did not exist before.
    pub async fn put(&self, doc: Document) -> Result<bool> {
        let instruction = if doc.id == INSTRUCTIONS_ID {
            Some(doc.definition_as::<Instruction>()?)
        } else {
            None
        };

        let created = self
            .documents
            .write()
            .await
            .insert(doc.id.clone(), doc)
            .is_none();

        if let (Some(instruction), Some(inbox)) = (instruction, &self.inbox) {
            inbox.deliver(instruction);
        }

        Ok(created)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    fn endpoint(&self) -> &str {
        "in-process"
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        self.put(doc.clone()).await.map(|_| ())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.documents.write().await.remove(id).is_some())
    }

    async fn heartbeat(&self) -> Result<bool> {
        Ok(true)
    }

    async fn events_online(&self) -> Result<bool> {
        Ok(self.inbox.as_ref().is_some_and(InstructionInbox::is_online))
    }
}
