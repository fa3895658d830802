#![forbid(unsafe_code)]

//! Orchestration for the book wiki: turns, tools, chapter advancement and
//! the worker pool, on top of `bw_storage`.

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pool;
pub mod scheduler;
pub mod tools;
pub mod transport;

pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use pool::{WorkerPool, WorkerSummary};
pub use scheduler::{Advance, PassReport, Scheduler};
pub use transport::{
    Clock, LlmTransport, SystemClock, ToolDescriptor, ToolInvocation, TransportError, TurnMessage,
    TurnRequest, TurnResponse,
};
