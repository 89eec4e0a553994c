use std::io;

use thiserror::Error;

use crate::core::{RunReport, WorkerId};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] shared_memory::ShmemError),
    /// raw_sync reports `Box<dyn Error>` which is not `Send`, so only its message is kept.
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Could not provision {resource}: {source}")]
    Provision {
        resource: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Could not spawn worker {worker}: {source}")]
    Spawn {
        worker: WorkerId,
        #[source]
        source: io::Error,
    },
    #[error("{op} failed: {source}")]
    Synchronization {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Logic error: {0}")]
    Logic(String),
    #[error("{failed} of {total} workers terminated abnormally, detection total is unreliable")]
    AbnormalExit {
        report: Box<RunReport>,
        failed: usize,
        total: usize,
    },
}

impl HarnessError {
    #[inline]
    pub(crate) fn lock(err: Box<dyn std::error::Error>) -> HarnessError {
        HarnessError::Lock(err.to_string())
    }

    #[inline]
    pub(crate) fn last_os(op: &'static str) -> HarnessError {
        HarnessError::Synchronization { op, source: io::Error::last_os_error() }
    }

    /// The best-effort report of a run that lost workers, if this is such an error.
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            HarnessError::AbnormalExit { report, .. } => Some(report),
            _ => None,
        }
    }
}
