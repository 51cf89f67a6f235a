//! Named JSON state documents and the clients that move them between hosts.
//!
//! - [`Document`] / [`State`]: the wire shape, `{ id, definition }`
//! - [`StateStore`]: get/upsert/delete against one endpoint
//! - [`HttpStateClient`]: the store of a remote (or loop-back) agent API
//! - [`InMemoryStateStore`]: the store an agent serves to its peers
//! - [`StatePoller`]: bounded, cancellable polling on top of any store

pub mod client;
pub mod document;
pub mod memory;
pub mod poller;

pub use client::{HttpStateClient, StateStore};
pub use document::{started_document_id, Document, State, WorkloadState};
pub use memory::InMemoryStateStore;
pub use poller::StatePoller;
