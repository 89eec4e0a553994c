use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use raw_sync::locks::{LockImpl, LockInit, Mutex};
use shared_memory::{Shmem, ShmemConf};

use super::{run_worker, ConcurrencyBackend, ExecutionContext};
use crate::core::{GateKind, Termination, WorkerId, WorkerOutcome};
use crate::errors::HarnessError;
use crate::gate::{Gate, Tally};
use crate::workload::Workload;

pub const EXIT_WORKER_FAILED: i32 = 70;
pub const EXIT_WORKER_PANICKED: i32 = 101;

const COUNTER_SIZE: usize = mem::size_of::<u64>();
const COUNTER_ALIGN: usize = mem::align_of::<u64>();

#[inline]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// POSIX unnamed semaphore placed in the shared segment, initialized with one permit.
pub struct SemaphoreGate {
    sem: *mut libc::sem_t,
}

impl SemaphoreGate {
    /// # Safety
    /// `sem` must point to writable, suitably aligned memory shared with every worker.
    unsafe fn init(sem: *mut libc::sem_t) -> Result<SemaphoreGate, HarnessError> {
        if libc::sem_init(sem, 1, 1) != 0 {
            return Err(HarnessError::Provision { resource: "semaphore", source: io::Error::last_os_error() });
        }
        Ok(SemaphoreGate { sem: sem })
    }
}

impl Gate for SemaphoreGate {
    fn acquire(&self) -> Result<(), HarnessError> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(HarnessError::Synchronization { op: "sem_wait", source: err });
            }
        }
    }

    fn release(&self) -> Result<(), HarnessError> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(HarnessError::last_os("sem_post"));
        }
        Ok(())
    }
}

impl Drop for SemaphoreGate {
    fn drop(&mut self) {
        if unsafe { libc::sem_destroy(self.sem) } != 0 {
            log::error!("sem_destroy: {}", io::Error::last_os_error());
        }
    }
}

/// Process-shared pthread mutex from raw_sync, placed in the shared segment.
pub struct MutexGate {
    lock: Box<dyn LockImpl>,
}

impl Gate for MutexGate {
    fn acquire(&self) -> Result<(), HarnessError> {
        let guard = self.lock.lock().map_err(HarnessError::lock)?;
        // Ownership moves to the caller, who gives it back through `release`.
        mem::forget(guard);
        Ok(())
    }

    fn release(&self) -> Result<(), HarnessError> {
        self.lock.release().map_err(HarnessError::lock)
    }
}

enum ProcessGate {
    Semaphore(SemaphoreGate),
    Mutex(MutexGate),
}

impl ProcessGate {
    #[inline]
    fn as_gate(&self) -> &dyn Gate {
        match self {
            ProcessGate::Semaphore(g) => g,
            ProcessGate::Mutex(g) => g,
        }
    }
}

/// Counter and gate living in one shared memory segment owned by the coordinator.
pub struct SharedRegion {
    // Declaration order is drop order: the gate goes before the segment holding it.
    gate: ProcessGate,
    value: *mut u64,
    shmem: Shmem,
}

impl SharedRegion {
    fn create(kind: GateKind, segment_name: Option<&str>) -> Result<SharedRegion, HarnessError> {
        match kind {
            GateKind::Semaphore => {
                let value_offset = align_up(mem::size_of::<libc::sem_t>(), COUNTER_ALIGN);
                let shmem = create_segment(value_offset + COUNTER_SIZE, segment_name)?;
                let base = shmem.as_ptr();
                unsafe {
                    let value = base.add(value_offset) as *mut u64;
                    ptr::write(value, 0);
                    let gate = SemaphoreGate::init(base as *mut libc::sem_t)?;
                    Ok(SharedRegion { gate: ProcessGate::Semaphore(gate), value: value, shmem: shmem })
                }
            }
            GateKind::Mutex => {
                let shmem = create_segment(Mutex::size_of(None) + COUNTER_ALIGN + COUNTER_SIZE, segment_name)?;
                let base = shmem.as_ptr();
                let value_offset = align_up(Mutex::size_of(Some(base)), COUNTER_ALIGN);
                unsafe {
                    let value = base.add(value_offset) as *mut u64;
                    ptr::write(value, 0);
                    let (lock, _) = Mutex::new(base, value as *mut u8).map_err(HarnessError::lock)?;
                    Ok(SharedRegion { gate: ProcessGate::Mutex(MutexGate { lock: lock }), value: value, shmem: shmem })
                }
            }
        }
    }

    pub fn os_id(&self) -> &str {
        self.shmem.get_os_id()
    }
}

fn create_segment(size: usize, segment_name: Option<&str>) -> Result<Shmem, HarnessError> {
    let mut conf = ShmemConf::new().size(size);
    if let Some(name) = segment_name {
        conf = conf.os_id(name);
    }
    let shmem = conf.create()?;
    log::debug!("created shared segment {} ({} bytes)", shmem.get_os_id(), shmem.len());
    Ok(shmem)
}

pub enum ProcessTally {
    Shared(SharedRegion),
    /// Nothing is shared between workers.
    Detached,
}

impl Tally for ProcessTally {
    #[inline]
    fn gate(&self) -> Option<&dyn Gate> {
        match self {
            ProcessTally::Shared(region) => Some(region.gate.as_gate()),
            ProcessTally::Detached => None,
        }
    }

    unsafe fn add_one(&self) -> u64 {
        match self {
            ProcessTally::Shared(region) => {
                let value = ptr::read_volatile(region.value) + 1;
                ptr::write_volatile(region.value, value);
                value
            }
            ProcessTally::Detached => 0,
        }
    }

    unsafe fn load(&self) -> u64 {
        match self {
            ProcessTally::Shared(region) => ptr::read_volatile(region.value),
            ProcessTally::Detached => 0,
        }
    }
}

pub struct ProcessContext {
    id: WorkerId,
    pid: libc::pid_t,
}

impl ProcessContext {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

impl ExecutionContext for ProcessContext {
    #[inline]
    fn id(&self) -> WorkerId {
        self.id
    }

    fn wait(self) -> WorkerOutcome {
        let mut status: libc::c_int = 0;
        let termination = loop {
            if unsafe { libc::waitpid(self.pid, &mut status, 0) } == self.pid {
                break termination_of(status);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                break Termination::Unobserved(format!("waitpid({}): {}", self.pid, err));
            }
        };
        log::debug!("reaped camera {} (pid {}): {}", self.id, self.pid, termination);
        WorkerOutcome { id: self.id, termination: termination }
    }
}

fn termination_of(status: libc::c_int) -> Termination {
    if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            0 => Termination::Completed,
            EXIT_WORKER_PANICKED => Termination::Panicked("worker process panicked".to_string()),
            EXIT_WORKER_FAILED => Termination::Failed("worker process reported an error".to_string()),
            code => Termination::Exited(code),
        }
    } else if libc::WIFSIGNALED(status) {
        Termination::Signaled(libc::WTERMSIG(status))
    } else {
        Termination::Unobserved(format!("unexpected wait status {:#x}", status))
    }
}

/// Workers are forked children of the coordinator.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    gate: Option<GateKind>,
    segment_name: Option<String>,
}

impl ProcessBackend {
    /// Workers share a counter guarded by `gate`.
    pub fn shared(gate: GateKind) -> ProcessBackend {
        ProcessBackend { gate: Some(gate), segment_name: None }
    }

    /// Workers share nothing; runs report no total.
    pub fn isolated() -> ProcessBackend {
        ProcessBackend { gate: None, segment_name: None }
    }

    pub fn segment_name(mut self, name: Option<String>) -> ProcessBackend {
        self.segment_name = name;
        self
    }
}

impl ConcurrencyBackend for ProcessBackend {
    type Tally = ProcessTally;
    type Context = ProcessContext;

    fn name(&self) -> &'static str {
        match self.gate {
            Some(GateKind::Semaphore) => "process (semaphore)",
            Some(GateKind::Mutex) => "process (mutex)",
            None => "process (isolated)",
        }
    }

    fn provision(&self) -> Result<ProcessTally, HarnessError> {
        match self.gate {
            Some(kind) => Ok(ProcessTally::Shared(SharedRegion::create(kind, self.segment_name.as_deref())?)),
            None => Ok(ProcessTally::Detached),
        }
    }

    fn spawn<W>(&self, id: WorkerId, tally: &ProcessTally, workload: W) -> Result<ProcessContext, HarnessError>
    where
        W: Workload + Send + 'static,
    {
        match unsafe { libc::fork() } {
            -1 => Err(HarnessError::Spawn { worker: id, source: io::Error::last_os_error() }),
            0 => {
                let code = match panic::catch_unwind(AssertUnwindSafe(|| run_worker(id, workload, tally))) {
                    Ok(Ok(_)) => 0,
                    Ok(Err(e)) => {
                        log::error!("camera {}: {}", id, e);
                        EXIT_WORKER_FAILED
                    }
                    Err(_) => EXIT_WORKER_PANICKED,
                };
                // Skip destructors: the segment and the gate belong to the coordinator.
                unsafe { libc::_exit(code) }
            }
            pid => {
                log::debug!("spawned camera {} as pid {}", id, pid);
                Ok(ProcessContext { id: id, pid: pid })
            }
        }
    }
}
