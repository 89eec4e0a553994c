use std::collections::HashSet;
use std::error::Error;
use std::sync::{Arc, Mutex};

use super::support::{shared_process_backends, Stub};
use crate::backend::{ConcurrencyBackend, ProcessBackend, ThreadBackend};
use crate::core::{GateKind, WorkerId};
use crate::coordinator::Coordinator;
use crate::workload::Workload;

const RUNS: usize = 25;

fn assert_exact_total<B: ConcurrencyBackend>(backend: B, workers: usize, steps: usize) -> Result<(), Box<dyn Error>> {
    let coordinator = Coordinator::new(backend);
    for run in 0..RUNS {
        let report = coordinator.run(workers, |_| Stub::always(steps))?;
        assert_eq!(
            report.total_detections,
            Some((workers * steps) as u64),
            "run {} on {} lost or duplicated increments",
            run,
            report.backend
        );
        assert_eq!(report.completed_workers(), workers);
    }
    Ok(())
}

#[test]
fn test_thread_counter_is_exact_across_runs() -> Result<(), Box<dyn Error>> {
    assert_exact_total(ThreadBackend::new(), 8, 5)?;
    assert_exact_total(ThreadBackend::new(), 16, 200)?;
    assert_exact_total(ThreadBackend::new(), 1, 3)
}

#[test]
fn test_process_counter_is_exact_across_runs() -> Result<(), Box<dyn Error>> {
    for backend in shared_process_backends() {
        assert_exact_total(backend.clone(), 8, 5)?;
        assert_exact_total(backend, 4, 100)?;
    }
    Ok(())
}

#[test]
fn test_zero_steps_count_nothing() -> Result<(), Box<dyn Error>> {
    let report = Coordinator::new(ThreadBackend::new()).run(8, |_| Stub::always(0))?;
    assert_eq!(report.total_detections, Some(0));
    let report = Coordinator::new(ProcessBackend::shared(GateKind::Semaphore)).run(3, |_| Stub::always(0))?;
    assert_eq!(report.total_detections, Some(0));
    Ok(())
}

#[test]
fn test_no_detections_means_zero() -> Result<(), Box<dyn Error>> {
    for workers in [1, 4, 8] {
        let report = Coordinator::new(ThreadBackend::new()).run(workers, |_| Stub::never(5))?;
        assert_eq!(report.total_detections, Some(0));
        for backend in shared_process_backends() {
            let report = Coordinator::new(backend).run(workers, |_| Stub::never(5))?;
            assert_eq!(report.total_detections, Some(0));
        }
    }
    Ok(())
}

#[test]
fn test_isolated_workers_report_no_total() -> Result<(), Box<dyn Error>> {
    let report = Coordinator::new(ProcessBackend::isolated()).run(8, |_| Stub::always(5))?;
    assert_eq!(report.total_detections, None);
    assert_eq!(report.completed_workers(), 8);
    assert!(report.is_reliable());
    Ok(())
}

#[test]
fn test_zero_workers_is_rejected() {
    let result = Coordinator::new(ThreadBackend::new()).run(0, |_| Stub::always(1));
    assert!(matches!(result, Err(crate::HarnessError::Config(_))));
}

/// Records which workers ran at least one step.
struct Marking {
    inner: Stub,
    seen: Arc<Mutex<HashSet<WorkerId>>>,
}

impl Workload for Marking {
    fn steps(&self) -> usize {
        self.inner.steps()
    }

    fn run_step(&mut self, id: WorkerId, step: usize) -> bool {
        self.seen.lock().unwrap().insert(id);
        self.inner.run_step(id, step)
    }
}

#[test]
fn test_every_worker_runs() -> Result<(), Box<dyn Error>> {
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let report = Coordinator::new(ThreadBackend::new()).run(12, |_| Marking {
        inner: Stub::never(2),
        seen: Arc::clone(&seen),
    })?;
    assert_eq!(seen.lock().unwrap().len(), 12);
    let ids: Vec<WorkerId> = report.workers.iter().map(|w| w.id).collect();
    assert_eq!(ids, (0..12).map(WorkerId).collect::<Vec<_>>());
    Ok(())
}
