//! Site checking: probe execution and per-site scheduling.

pub mod prober;
pub mod scheduler;
pub mod types;

pub use prober::{HttpProber, Probe};
pub use scheduler::Scheduler;
pub use types::ProbeResult;
