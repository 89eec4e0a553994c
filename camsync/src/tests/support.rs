use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::thread;
use std::time::Duration;

use crate::backend::ProcessBackend;
use crate::core::{GateKind, WorkerId};
use crate::workload::Workload;

/// Fixed-outcome workload: every step detects, or none does.
#[derive(Clone)]
pub struct Stub {
    pub steps: usize,
    pub detect: bool,
    pub delay: Duration,
    /// Worker id that panics on its second step.
    pub panic_in: Option<WorkerId>,
}

impl Stub {
    pub fn always(steps: usize) -> Stub {
        Stub { steps: steps, detect: true, delay: Duration::ZERO, panic_in: None }
    }

    pub fn never(steps: usize) -> Stub {
        Stub { steps: steps, detect: false, delay: Duration::ZERO, panic_in: None }
    }
}

impl Workload for Stub {
    fn steps(&self) -> usize {
        self.steps
    }

    fn run_step(&mut self, id: WorkerId, step: usize) -> bool {
        if self.panic_in == Some(id) && step == 1 {
            panic!("camera {} lost its feed", id);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.detect
    }
}

pub fn shared_process_backends() -> Vec<ProcessBackend> {
    vec![ProcessBackend::shared(GateKind::Semaphore), ProcessBackend::shared(GateKind::Mutex)]
}

/// Segment name no other test or run uses.
pub fn unique_segment_name(tag: &str) -> String {
    static SEGMENT_COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "/camsync_{}_{}_{}",
        tag,
        std::process::id(),
        SEGMENT_COUNTER.fetch_add(1, AtomicOrdering::SeqCst)
    )
}
