//! Execution models the coordinator can run workers under.
//!
//! Each backend decides where the counter and its gate live and how a worker gets its own
//! execution context. The worker body itself, [`run_worker`], is shared by all of them.

use crate::core::{WorkerId, WorkerOutcome};
use crate::errors::HarnessError;
use crate::gate::{protected_increment_with, Tally};
use crate::workload::Workload;

pub mod process;
pub mod thread;

pub use self::process::{ProcessBackend, ProcessTally};
pub use self::thread::{ThreadBackend, ThreadTally};

pub trait ConcurrencyBackend {
    type Tally: Tally;
    type Context: ExecutionContext;

    fn name(&self) -> &'static str;

    /// Creates the counter (at zero) and its free gate.
    fn provision(&self) -> Result<Self::Tally, HarnessError>;

    /// Starts `workload` in a new execution context bound to `tally`.
    fn spawn<W>(&self, id: WorkerId, tally: &Self::Tally, workload: W) -> Result<Self::Context, HarnessError>
    where
        W: Workload + Send + 'static;
}

/// Handle on a running worker.
pub trait ExecutionContext {
    fn id(&self) -> WorkerId;

    /// Blocks until the worker terminates.
    fn wait(self) -> WorkerOutcome;
}

/// Returns the number of detections this worker counted.
pub fn run_worker<W, T>(id: WorkerId, mut workload: W, tally: &T) -> Result<u64, HarnessError>
where
    W: Workload,
    T: Tally + ?Sized,
{
    let mut detections = 0u64;
    for step in 0..workload.steps() {
        if workload.run_step(id, step) {
            let inner = &mut workload;
            protected_increment_with(tally, |value| inner.critical_section(id, step, value))?;
            detections += 1;
        }
    }
    log::debug!("camera {} finished with {} detections", id, detections);
    Ok(detections)
}
