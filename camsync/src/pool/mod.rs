use crate::backend::{ConcurrencyBackend, ExecutionContext};
use crate::core::{WorkerId, WorkerOutcome};
use crate::errors::HarnessError;
use crate::workload::Workload;

/// The execution contexts of one run, one per worker id.
pub struct WorkerPool<C: ExecutionContext> {
    contexts: Vec<C>,
}

/// A spawn that stopped early. `pool` holds the workers already running.
pub struct SpawnFailure<C: ExecutionContext> {
    pub pool: WorkerPool<C>,
    pub error: HarnessError,
}

impl<C: ExecutionContext> WorkerPool<C> {
    pub fn spawn<B, W, F>(backend: &B, count: usize, tally: &B::Tally, mut factory: F) -> Result<WorkerPool<C>, SpawnFailure<C>>
    where
        B: ConcurrencyBackend<Context = C>,
        W: Workload + Send + 'static,
        F: FnMut(WorkerId) -> W,
    {
        let mut pool = WorkerPool { contexts: Vec::with_capacity(count) };
        for i in 0..count {
            let id = WorkerId(i);
            match backend.spawn(id, tally, factory(id)) {
                Ok(ctx) => pool.contexts.push(ctx),
                Err(error) => return Err(SpawnFailure { pool: pool, error: error }),
            }
        }
        Ok(pool)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Waits for every worker. Completion order is not observed, outcomes come back in spawn order.
    pub fn join_all(mut self) -> Vec<WorkerOutcome> {
        self.contexts.drain(..).map(|ctx| ctx.wait()).collect()
    }
}

impl<C: ExecutionContext> Drop for WorkerPool<C> {
    fn drop(&mut self) {
        for ctx in self.contexts.drain(..) {
            let outcome = ctx.wait();
            log::warn!("worker {} joined on pool drop: {}", outcome.id, outcome.termination);
        }
    }
}
