pub mod core;
pub mod errors;
pub mod gate;
pub mod workload;
pub mod backend;
pub mod pool;
pub mod coordinator;

#[cfg(test)]
mod tests;

pub use crate::core::{BackendKind, GateKind, HarnessConfig, RunReport, Termination, WorkerId, WorkerOutcome};
pub use crate::errors::HarnessError;
pub use crate::coordinator::{run_configured, Coordinator};
