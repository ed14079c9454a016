//! State module for job lifecycle tracking
//!
//! This module defines the authoritative lifecycle for a crawl job:
//!
//! - `JobState` / `JobSubstate`: the main-state graph and the ordered
//!   substates of each working phase
//! - `StateTransition`: an immutable record of one accepted transition
//! - `JobData`: the full mutable state of one job, only ever changed
//!   through validated transitions and phase-progress updates

mod job;
mod ledger;
mod machine;

pub use job::{
    JobData, JobMetrics, PhaseProgress, PhaseProgressSet, StateTransition,
};
pub use ledger::CrawlLedger;
pub use machine::{JobState, JobSubstate};
