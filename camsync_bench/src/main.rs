use std::error::Error;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};

use camsync::{BackendKind, GateKind, HarnessConfig, HarnessError, RunReport};

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Process,
    Thread,
    Isolated,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum GateArg {
    Semaphore,
    Mutex,
}

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "camsync.toml")]
    config: String,
    #[clap(long, value_enum)]
    backend: Option<BackendArg>,
    #[clap(long, value_enum)]
    gate: Option<GateArg>,
    #[clap(short = 'w', long = "workers")]
    workers: Option<usize>,
    #[clap(short = 's', long = "steps")]
    steps: Option<usize>,
    #[clap(long = "delay-ms")]
    delay_ms: Option<u64>,
    #[clap(long = "probability")]
    probability: Option<f64>,
    /// Number of back-to-back runs.
    #[clap(short = 'n', long = "repeat", default_value = "1")]
    repeat: usize,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct BenchConfig {
    harness: HarnessConfig,
}

impl Opts {
    fn apply(&self, cfg: &mut HarnessConfig) -> () {
        if let Some(backend) = self.backend {
            cfg.backend = match backend {
                BackendArg::Process => BackendKind::Process,
                BackendArg::Thread => BackendKind::Thread,
                BackendArg::Isolated => BackendKind::Isolated,
            };
        }
        if let Some(gate) = self.gate {
            cfg.gate = match gate {
                GateArg::Semaphore => GateKind::Semaphore,
                GateArg::Mutex => GateKind::Mutex,
            };
        }
        if let Some(workers) = self.workers {
            cfg.worker_count = workers;
        }
        if let Some(steps) = self.steps {
            cfg.steps_per_worker = steps;
        }
        if let Some(delay_ms) = self.delay_ms {
            cfg.step_delay_ms = delay_ms;
        }
        if let Some(probability) = self.probability {
            cfg.detection_probability = probability;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();
    let mut cfg: BenchConfig = confy::load_path(&opts.config)?;
    opts.apply(&mut cfg.harness);
    cfg.harness.validate()?;
    log::debug!("{:?}", &cfg.harness);

    // Keep the coordinator alive on interrupt so it can reap the workers and unlink the segment.
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&interrupted))?;

    run(&cfg.harness, opts.repeat, &interrupted)
}

fn run(cfg: &HarnessConfig, repeat: usize, interrupted: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let mut timings = Vec::with_capacity(repeat);
    let mut unreliable = 0usize;
    for n in 0..repeat {
        match camsync::run_configured(cfg) {
            Ok(report) => {
                print_report(&report);
                timings.push(report.elapsed_millis);
            }
            Err(HarnessError::AbnormalExit { report, failed, total }) => {
                print_report(&report);
                println!("WARNING: {} of {} cameras terminated abnormally, the total above is unreliable", failed, total);
                unreliable += 1;
            }
            Err(e) => return Err(Box::new(e)),
        }
        if interrupted.load(Ordering::Relaxed) {
            log::warn!("interrupted, stopping after run {} of {}", n + 1, repeat);
            break;
        }
    }
    if timings.len() > 1 {
        let mean = timings.iter().sum::<f64>() / timings.len() as f64;
        println!("Mean time over {} runs: {:.2} ms", timings.len(), mean);
    }
    if unreliable > 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::Other,
            format!("{} run(s) lost workers", unreliable),
        )));
    }
    Ok(())
}

fn print_report(report: &RunReport) -> () {
    match report.total_detections {
        Some(total) => println!("\nTotal faces detected: {}", total),
        None => println!("\nTotal faces detected: n/a (isolated workers)"),
    }
    println!("Total time with {}: {:.2} ms", report.backend, report.elapsed_millis);
}
