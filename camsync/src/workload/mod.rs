use std::process;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distr::Bernoulli;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::{HarnessConfig, WorkerId};
use crate::errors::HarnessError;

/// Work done by one worker: `steps()` sequential steps, each of which may flag a detection.
pub trait Workload {
    fn steps(&self) -> usize;

    /// Runs one step and tells whether it detected something.
    fn run_step(&mut self, id: WorkerId, step: usize) -> bool;

    /// Called with the new counter value while the gate is still held.
    #[inline]
    fn critical_section(&mut self, _id: WorkerId, _step: usize, _value: u64) -> () {}
}

/// Simulated camera: a fixed processing delay per image, then a face detected with a fixed probability.
pub struct CameraWorkload {
    steps: usize,
    delay: Duration,
    detector: Bernoulli,
    rng: StdRng,
}

pub fn detector(probability: f64) -> Result<Bernoulli, HarnessError> {
    Bernoulli::new(probability).map_err(|e| HarnessError::Config(format!("detection_probability {}: {}", probability, e)))
}

/// Seed that differs between workers started in the same instant, in the same or in different processes.
pub fn seed_for(id: WorkerId) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ ((process::id() as u64) << 32) ^ (id.0 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl CameraWorkload {
    pub fn for_worker(id: WorkerId, steps: usize, delay: Duration, detector: Bernoulli) -> CameraWorkload {
        CameraWorkload::with_seed(steps, delay, detector, seed_for(id))
    }

    pub fn with_seed(steps: usize, delay: Duration, detector: Bernoulli, seed: u64) -> CameraWorkload {
        CameraWorkload {
            steps: steps,
            delay: delay,
            detector: detector,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Workload for CameraWorkload {
    #[inline]
    fn steps(&self) -> usize {
        self.steps
    }

    fn run_step(&mut self, id: WorkerId, step: usize) -> bool {
        log::trace!("camera {} processing image {}", id, step);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let detected = self.rng.sample(self.detector);
        if detected {
            log::debug!("camera {} detected a face in image {}", id, step);
        }
        detected
    }
}

/// Per-worker factory of independently seeded cameras for `cfg`.
pub fn camera_factory(cfg: &HarnessConfig) -> Result<impl FnMut(WorkerId) -> CameraWorkload, HarnessError> {
    let detector = detector(cfg.detection_probability)?;
    let steps = cfg.steps_per_worker;
    let delay = cfg.step_delay();
    Ok(move |id| CameraWorkload::for_worker(id, steps, delay, detector))
}
