use std::time::Instant;

use crate::backend::{ConcurrencyBackend, ProcessBackend, ThreadBackend};
use crate::core::{BackendKind, HarnessConfig, RunReport, WorkerId};
use crate::errors::HarnessError;
use crate::gate::{read_total, Tally};
use crate::pool::{SpawnFailure, WorkerPool};
use crate::workload::{camera_factory, Workload};

/// Owns one run: provisions the shared state, starts the workers, waits for all of them,
/// then releases the shared state and reports.
pub struct Coordinator<B: ConcurrencyBackend> {
    backend: B,
}

impl<B: ConcurrencyBackend> Coordinator<B> {
    pub fn new(backend: B) -> Coordinator<B> {
        Coordinator { backend: backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn run<W, F>(&self, worker_count: usize, factory: F) -> Result<RunReport, HarnessError>
    where
        W: Workload + Send + 'static,
        F: FnMut(WorkerId) -> W,
    {
        if worker_count == 0 {
            return Err(HarnessError::Config("worker_count must be at least 1".to_string()));
        }
        let name = self.backend.name();
        let start = Instant::now();

        let tally = self.backend.provision()?;
        log::info!("starting {} cameras on the {} backend", worker_count, name);

        let pool = match WorkerPool::spawn(&self.backend, worker_count, &tally, factory) {
            Ok(pool) => pool,
            Err(SpawnFailure { pool, error }) => {
                let started = pool.len();
                pool.join_all();
                drop(tally);
                log::error!("spawn failed after {} of {} workers: {}", started, worker_count, error);
                return Err(error);
            }
        };
        let workers = pool.join_all();

        let elapsed_millis = start.elapsed().as_secs_f64() * 1000.0;
        let total = if workers.iter().all(|w| w.termination.is_normal()) {
            read_total(&tally)
        } else {
            // Every context is reaped, but a worker that died inside the section still holds the gate.
            Ok(tally.gate().map(|_| unsafe { tally.load() }))
        };
        drop(tally);
        let total_detections = total?;

        let report = RunReport {
            backend: name,
            total_detections: total_detections,
            elapsed_millis: elapsed_millis,
            workers: workers,
        };
        let failed = report.workers.len() - report.completed_workers();
        if failed > 0 {
            for w in report.workers.iter().filter(|w| !w.termination.is_normal()) {
                log::warn!("camera {} {}", w.id, w.termination);
            }
            let total = report.workers.len();
            return Err(HarnessError::AbnormalExit { report: Box::new(report), failed: failed, total: total });
        }
        log::info!(
            "{} cameras finished on the {} backend in {:.2} ms",
            worker_count,
            name,
            report.elapsed_millis
        );
        Ok(report)
    }
}

/// Runs the camera simulation described by `cfg`.
pub fn run_configured(cfg: &HarnessConfig) -> Result<RunReport, HarnessError> {
    cfg.validate()?;
    let factory = camera_factory(cfg)?;
    match cfg.backend {
        BackendKind::Thread => Coordinator::new(ThreadBackend::new()).run(cfg.worker_count, factory),
        BackendKind::Process => {
            let backend = ProcessBackend::shared(cfg.gate).segment_name(cfg.segment_name.clone());
            Coordinator::new(backend).run(cfg.worker_count, factory)
        }
        BackendKind::Isolated => Coordinator::new(ProcessBackend::isolated()).run(cfg.worker_count, factory),
    }
}
