//! Mining job and solution types.

use rust_decimal::Decimal;
use strum::Display;

use super::Algorithm;

/// Longest job tag, in hex characters.
const JOB_ID_LEN: usize = 7;

/// What a published job asks the hashing engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum JobKind {
    /// Start (or retarget) work on the enclosed nonce
    New,
    /// Halt all work and wait for the next `New` job
    Stop,
}

/// Unit of work handed to the hashing engine.
///
/// The pool connection is the only producer. A job republished with an
/// unchanged `id` but a different `difficulty` is a retarget of the work
/// already in progress, not new work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Short tag derived from the nonce, for logs
    pub id: String,

    pub kind: JobKind,

    /// Display label
    pub name: String,

    /// Raw bytes that define the work
    pub nonce: Vec<u8>,

    /// Share target the engine must meet
    pub difficulty: Decimal,

    /// Hashing algorithm, absent for `Stop` jobs
    pub algorithm: Option<Algorithm>,
}

impl Job {
    /// Create a `New` job for `nonce`.
    pub fn new(
        name: impl Into<String>,
        nonce: Vec<u8>,
        difficulty: Decimal,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            id: job_id(&nonce),
            kind: JobKind::New,
            name: name.into(),
            nonce,
            difficulty,
            algorithm: Some(algorithm),
        }
    }

    /// Create the `Stop` job published when a connection closes.
    pub fn stop() -> Self {
        Self {
            id: String::new(),
            kind: JobKind::Stop,
            name: String::new(),
            nonce: Vec::new(),
            difficulty: Decimal::ZERO,
            algorithm: None,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.kind == JobKind::Stop
    }
}

/// Hex of the nonce, cut to at most one character per nonce byte and never
/// more than seven characters.
fn job_id(nonce: &[u8]) -> String {
    let mut id = hex::encode(nonce);
    id.truncate(JOB_ID_LEN.min(nonce.len()));
    id
}

/// Candidate answer to a [`Job`], produced by the hashing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSolution {
    /// Nonce of the solved job
    pub nonce: Vec<u8>,

    /// Proof bytes
    pub solution: Vec<u8>,
}

impl JobSolution {
    pub fn new(nonce: Vec<u8>, solution: Vec<u8>) -> Self {
        Self { nonce, solution }
    }

    /// Hex form of the nonce, as sent on the wire.
    pub fn nonce_hex(&self) -> String {
        hex::encode(&self.nonce)
    }

    /// Hex form of the proof, as sent on the wire.
    pub fn solution_hex(&self) -> String {
        hex::encode(&self.solution)
    }
}

/// Pool verdict on one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SubmitResult {
    Accepted,
    Rejected,
    /// No acknowledgement arrived before the deadline
    Timeout,
}
