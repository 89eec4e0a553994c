use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use super::{run_worker, ConcurrencyBackend, ExecutionContext};
use crate::core::{Termination, WorkerId, WorkerOutcome};
use crate::errors::HarnessError;
use crate::gate::{Gate, Tally};
use crate::workload::Workload;

/// In-process lock with explicit acquire/release.
pub struct ThreadGate {
    raw: RawMutex,
}

impl ThreadGate {
    pub fn new() -> ThreadGate {
        ThreadGate { raw: RawMutex::INIT }
    }
}

impl Gate for ThreadGate {
    #[inline]
    fn acquire(&self) -> Result<(), HarnessError> {
        self.raw.lock();
        Ok(())
    }

    fn release(&self) -> Result<(), HarnessError> {
        if !self.raw.is_locked() {
            return Err(HarnessError::Logic("thread gate released while free".to_string()));
        }
        unsafe { self.raw.unlock() };
        Ok(())
    }
}

struct Shared {
    gate: ThreadGate,
    value: UnsafeCell<u64>,
}

// `value` is only touched through `Tally::add_one`/`load`, whose callers hold `gate`.
unsafe impl Sync for Shared {}

/// Counter and lock shared by reference between the coordinator and its worker threads.
#[derive(Clone)]
pub struct ThreadTally {
    shared: Arc<Shared>,
}

impl Tally for ThreadTally {
    #[inline]
    fn gate(&self) -> Option<&dyn Gate> {
        Some(&self.shared.gate)
    }

    #[inline]
    unsafe fn add_one(&self) -> u64 {
        let value = self.shared.value.get();
        *value += 1;
        *value
    }

    #[inline]
    unsafe fn load(&self) -> u64 {
        *self.shared.value.get()
    }
}

pub struct ThreadContext {
    id: WorkerId,
    handle: JoinHandle<Result<u64, HarnessError>>,
}

impl ExecutionContext for ThreadContext {
    #[inline]
    fn id(&self) -> WorkerId {
        self.id
    }

    fn wait(self) -> WorkerOutcome {
        let termination = match self.handle.join() {
            Ok(Ok(_)) => Termination::Completed,
            Ok(Err(e)) => Termination::Failed(e.to_string()),
            Err(payload) => Termination::Panicked(panic_message(payload.as_ref())),
        };
        WorkerOutcome { id: self.id, termination: termination }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Workers are named threads of the coordinator process.
#[derive(Debug, Default, Clone)]
pub struct ThreadBackend;

impl ThreadBackend {
    pub fn new() -> ThreadBackend {
        ThreadBackend
    }
}

impl ConcurrencyBackend for ThreadBackend {
    type Tally = ThreadTally;
    type Context = ThreadContext;

    fn name(&self) -> &'static str {
        "thread"
    }

    fn provision(&self) -> Result<ThreadTally, HarnessError> {
        Ok(ThreadTally {
            shared: Arc::new(Shared {
                gate: ThreadGate::new(),
                value: UnsafeCell::new(0),
            }),
        })
    }

    fn spawn<W>(&self, id: WorkerId, tally: &ThreadTally, workload: W) -> Result<ThreadContext, HarnessError>
    where
        W: Workload + Send + 'static,
    {
        let tally = tally.clone();
        let handle = thread::Builder::new()
            .name(format!("camera-{}", id))
            .spawn(move || run_worker(id, workload, &tally))
            .map_err(|e| HarnessError::Spawn { worker: id, source: e })?;
        Ok(ThreadContext { id: id, handle: handle })
    }
}
