//! Channels between the pool side and the hashing engines.
//!
//! ```text
//! PoolConnection --Job--> [job channel] --> hashing engine
//! hashing engine --JobSolution--> [solution channel] --> ConnectionManager
//! ```
//!
//! The job channel is bounded: the active connection is its only producer
//! and waits for the engine rather than dropping work. The solution channel
//! is unbounded so submission latency never stalls hashing.

use tokio::sync::mpsc;

use super::{Job, JobSolution};

/// Buffered jobs before the connection's receive loop waits on the engine.
pub const JOB_CHANNEL_CAPACITY: usize = 100;

pub type JobSender = mpsc::Sender<Job>;
pub type JobReceiver = mpsc::Receiver<Job>;
pub type SolutionSender = mpsc::UnboundedSender<JobSolution>;
pub type SolutionReceiver = mpsc::UnboundedReceiver<JobSolution>;

/// Create the pool-to-engine job channel.
pub fn job_channel() -> (JobSender, JobReceiver) {
    mpsc::channel(JOB_CHANNEL_CAPACITY)
}

/// Create the engine-to-manager solution channel.
pub fn solution_channel() -> (SolutionSender, SolutionReceiver) {
    mpsc::unbounded_channel()
}
