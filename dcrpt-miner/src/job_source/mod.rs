//! Work and solution types exchanged with the hashing engines.
//!
//! The pool connection turns work notifications into [`Job`]s and publishes
//! them on the job channel; the engines answer with [`JobSolution`]s on the
//! solution channel, which the connection manager drains and submits. Each
//! job carries the [`Algorithm`] it must be mined with, picked by an
//! [`AlgorithmPolicy`].

mod algorithm;
pub mod channels;
mod job;

pub use algorithm::{Algorithm, AlgorithmPolicy};
pub use channels::{
    job_channel, solution_channel, JobReceiver, JobSender, SolutionReceiver, SolutionSender,
};
pub use job::{Job, JobKind, JobSolution, SubmitResult};
