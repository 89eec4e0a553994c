use std::fmt;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::errors::HarnessError;

pub const DEFAULT_WORKER_COUNT: usize = 8;
pub const DEFAULT_STEPS_PER_WORKER: usize = 5;
pub const DEFAULT_DETECTION_PROBABILITY: f64 = 0.3;
pub const DEFAULT_STEP_DELAY_MS: u64 = 100;

/// Label of one worker, in `[0, worker_count)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Forked workers sharing a counter through a shared memory segment.
    Process,
    /// Threads of the coordinator sharing a counter behind a lock.
    Thread,
    /// Forked workers with nothing shared at all.
    Isolated,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Process
    }
}

/// Cross-process primitive guarding the counter of the process backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Semaphore,
    Mutex,
}

impl Default for GateKind {
    fn default() -> Self {
        GateKind::Semaphore
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub backend: BackendKind,
    /// Only read by the process backend.
    pub gate: GateKind,
    pub worker_count: usize,
    pub steps_per_worker: usize,
    pub detection_probability: f64,
    pub step_delay_ms: u64,
    /// Fixed OS identifier of the shared segment. A random one is used when unset.
    pub segment_name: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            backend: BackendKind::default(),
            gate: GateKind::default(),
            worker_count: DEFAULT_WORKER_COUNT,
            steps_per_worker: DEFAULT_STEPS_PER_WORKER,
            detection_probability: DEFAULT_DETECTION_PROBABILITY,
            step_delay_ms: DEFAULT_STEP_DELAY_MS,
            segment_name: None,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.worker_count == 0 {
            return Err(HarnessError::Config("worker_count must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.detection_probability) {
            return Err(HarnessError::Config(format!(
                "detection_probability must be within [0, 1], got {}",
                self.detection_probability
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// How an execution context ended, as observed by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Completed,
    /// The worker body returned an error, e.g. the gate could not be acquired.
    Failed(String),
    Panicked(String),
    /// Non-zero exit status of a worker process.
    Exited(i32),
    /// Worker process killed by a signal.
    Signaled(i32),
    /// The context could not be reaped.
    Unobserved(String),
}

impl Termination {
    #[inline]
    pub fn is_normal(&self) -> bool {
        *self == Termination::Completed
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::Failed(s) => write!(f, "failed: {}", s),
            Termination::Panicked(s) => write!(f, "panicked: {}", s),
            Termination::Exited(code) => write!(f, "exited with status {}", code),
            Termination::Signaled(sig) => write!(f, "killed by signal {}", sig),
            Termination::Unobserved(s) => write!(f, "not observed: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub id: WorkerId,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub backend: &'static str,
    /// `None` when the backend shares no counter.
    pub total_detections: Option<u64>,
    pub elapsed_millis: f64,
    pub workers: Vec<WorkerOutcome>,
}

impl RunReport {
    pub fn completed_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.termination.is_normal()).count()
    }

    /// False when any worker stopped before finishing its steps. The total is then best-effort.
    pub fn is_reliable(&self) -> bool {
        self.completed_workers() == self.workers.len()
    }
}
