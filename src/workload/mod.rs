//! Workload definitions and process execution.
//!
//! The coordinator never builds tool-specific command lines itself: each
//! workload in the [`WorkloadCatalog`] names the processes its primary and
//! secondary sides run, and a [`ProcessExecutor`] launches them.

pub mod catalog;
pub mod executor;

pub use catalog::{ClientWorkload, ServerWorkload, WorkloadCatalog, WorkloadDefinition};
pub use executor::{ProcessExecutor, ProcessOutput, ProcessSpec, ShellExecutor};
