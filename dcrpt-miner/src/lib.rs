//! Pool connectivity core of the dcrpt mining client.
//!
//! Hashing engines are external: they consume [`job_source::Job`]s from the
//! job channel, report hash counts to [`telemetry::Telemetry`], and push
//! [`job_source::JobSolution`]s into the solution channel. Everything between
//! those channels and the pool lives here.

pub mod api;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod job_source;
pub mod pool;
pub mod shutdown;
pub mod stratum;
pub mod telemetry;
pub mod tracing;
pub mod types;
