pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod instruction;
pub mod node;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod topology;
pub mod workload;
