#![forbid(unsafe_code)]

use crate::config::ConfigError;
use bw_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Config(_) => "CONFIG",
            Self::WorkerPanicked(_) => "WORKER_PANICKED",
        }
    }
}
