use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CoordError, Result};
use crate::state::{Document, StateStore};

const HEARTBEAT_TARGET: &str = "heartbeat";
const EVENTS_TARGET: &str = "events";

/// Polls a state store on a fixed interval until a condition holds or a deadline passes.
///
/// Individual call failures (peer not listening yet, malformed responses) count
/// as "not yet"; only the deadline ends a poll unsuccessfully. The deadline check
/// is `now >= deadline`, so a check that fails exactly at the deadline expires.
/// Both the store call and the inter-poll sleep are raced against the
/// cancellation token.
#[derive(Debug, Clone)]
pub struct StatePoller {
    interval: Duration,
}

impl StatePoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until document `id` exists and satisfies `predicate`.
    pub async fn poll_until_match<F>(
        &self,
        store: &dyn StateStore,
        id: &str,
        predicate: F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Document>
    where
        F: Fn(&Document) -> bool,
    {
        let predicate = &predicate;
        self.poll("poll-until-match", id, timeout, cancel, || async move {
            match store.get(id).await {
                Ok(Some(doc)) if predicate(&doc) => Some(doc),
                Ok(Some(_)) | Ok(None) => None,
                Err(e) => {
                    tracing::debug!(
                        endpoint = store.endpoint(),
                        document = id,
                        error = %e,
                        "State not available yet"
                    );
                    None
                }
            }
        })
        .await
    }

    /// Wait until document `id` is reported absent.
    pub async fn poll_until_absent(
        &self,
        store: &dyn StateStore,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.poll("poll-until-absent", id, timeout, cancel, || async move {
            match store.get(id).await {
                Ok(None) => Some(()),
                Ok(Some(_)) => None,
                Err(e) => {
                    tracing::debug!(
                        endpoint = store.endpoint(),
                        document = id,
                        error = %e,
                        "State not reachable yet"
                    );
                    None
                }
            }
        })
        .await
    }

    /// Wait until the store's API answers its heartbeat.
    pub async fn poll_for_heartbeat(
        &self,
        store: &dyn StateStore,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.poll("poll-for-heartbeat", HEARTBEAT_TARGET, timeout, cancel, || async move {
            matches!(store.heartbeat().await, Ok(true)).then_some(())
        })
        .await
    }

    /// Wait until the store's host has an instruction receiver online.
    pub async fn poll_for_online(
        &self,
        store: &dyn StateStore,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.poll("poll-for-online", EVENTS_TARGET, timeout, cancel, || async move {
            matches!(store.events_online().await, Ok(true)).then_some(())
        })
        .await
    }

    async fn poll<T, F, Fut>(
        &self,
        operation: &str,
        document: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        mut check: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let deadline = Instant::now() + timeout;
        let mut polls: u64 = 0;

        loop {
            polls += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoordError::Cancelled),
                outcome = check() => outcome,
            };

            if let Some(value) = outcome {
                tracing::debug!(operation, document, polls, "Poll satisfied");
                return Ok(value);
            }

            if Instant::now() >= deadline {
                tracing::warn!(operation, document, polls, timeout = ?timeout, "Poll timed out");
                return Err(CoordError::CoordinationTimeout {
                    document: document.to_string(),
                    timeout,
                    phase: operation.to_string(),
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoordError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
