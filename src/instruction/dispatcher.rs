use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::instruction::Instruction;

/// Acts on instructions received by this host.
#[async_trait]
pub trait InstructionHandler: Send + Sync {
    async fn handle(&self, instruction: Instruction, cancel: &CancellationToken) -> Result<()>;
}

/// Create the delivery half and the single-consumer half of an instruction queue.
pub fn channel(capacity: usize) -> (InstructionInbox, InstructionReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let online = Arc::new(AtomicBool::new(false));
    (
        InstructionInbox {
            tx,
            online: online.clone(),
        },
        InstructionReceiver { rx, online },
    )
}

/// Delivery side, held by the state store that receives instruction documents.
#[derive(Debug, Clone)]
pub struct InstructionInbox {
    tx: mpsc::Sender<Instruction>,
    online: Arc<AtomicBool>,
}

impl InstructionInbox {
    /// Queue an instruction. Never blocks: a full queue drops the instruction.
    pub fn deliver(&self, instruction: Instruction) -> bool {
        match self.tx.try_send(instruction) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    instruction = %dropped.kind,
                    "Instruction queue full, dropping instruction"
                );
                false
            }
            Err(TrySendError::Closed(dropped)) => {
                tracing::warn!(
                    instruction = %dropped.kind,
                    "Instruction receiver closed, dropping instruction"
                );
                false
            }
        }
    }

    /// True while a dispatcher is draining the queue.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct InstructionReceiver {
    rx: mpsc::Receiver<Instruction>,
    online: Arc<AtomicBool>,
}

impl InstructionReceiver {
    /// Take a queued instruction without waiting.
    pub fn try_recv(&mut self) -> Option<Instruction> {
        self.rx.try_recv().ok()
    }
}

/// Single consumer that hands instructions to a handler one at a time.
///
/// Handler errors and panics are logged and swallowed so one bad instruction
/// cannot take the receive loop down.
pub struct InstructionDispatcher {
    receiver: InstructionReceiver,
    handler: Arc<dyn InstructionHandler>,
}

impl InstructionDispatcher {
    pub fn new(receiver: InstructionReceiver, handler: Arc<dyn InstructionHandler>) -> Self {
        Self { receiver, handler }
    }

    /// Run until cancelled or until every inbox is dropped. Returns the number
    /// of instructions handled successfully.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let online = self.receiver.online.clone();
        online.store(true, Ordering::SeqCst);
        tracing::info!("Instruction receiver online");

        let mut handled = 0;
        loop {
            let instruction = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.receiver.rx.recv() => match next {
                    Some(instruction) => instruction,
                    None => break,
                },
            };

            if self.dispatch(instruction, &cancel).await {
                handled += 1;
            }
        }

        online.store(false, Ordering::SeqCst);
        tracing::info!(handled, "Instruction receiver offline");
        handled
    }

    async fn dispatch(&self, instruction: Instruction, cancel: &CancellationToken) -> bool {
        let kind = instruction.kind;
        let handler = self.handler.clone();
        let token = cancel.clone();

        tracing::info!(
            instruction = %kind,
            properties = ?instruction.properties,
            "Instruction received"
        );

        // Run on its own task so a panicking handler surfaces as a JoinError.
        let outcome =
            tokio::spawn(async move { handler.handle(instruction, &token).await }).await;

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(instruction = %kind, "Instruction handled");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(instruction = %kind, error = %e, "Instruction handling failed");
                false
            }
            Err(e) => {
                tracing::error!(instruction = %kind, error = %e, "Instruction handler panicked");
                false
            }
        }
    }
}
