//! Provide tracing, tailored to this program.
//!
//! The daemon calls one of the init_* functions at startup to install a
//! tracing subscriber. Everything else, including the periodic hashrate
//! report and the per-share outcome lines, is emitted through the usual
//! macros, so the log is the reporting sink.
//!
//! The rest of the program can include `use crate::tracing::prelude::*` for
//! convenient access to the `trace!()`, `debug!()`, `info!()`, `warn!()`,
//! and `error!()` macros.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging at the default level (INFO).
///
/// If running under systemd, use journald; otherwise fall back to stdout.
pub fn init_journald_or_stdout() {
    init_with_default_level(LevelFilter::INFO);
}

/// Initialize logging, using `level` when RUST_LOG does not say otherwise.
pub fn init_with_default_level(level: LevelFilter) {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(level)
                    .with(layer)
                    .init();
            }
            Err(e) => {
                use_stdout(level);
                error!(error = %e, "Failed to initialize journald logging, using stdout.");
            }
        }
    } else {
        use_stdout(level);
    }
}

// Log to stdout, filtering according to environment variable RUST_LOG.
fn use_stdout(level: LevelFilter) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Local wall-clock time to the nearest second; share lines are read by
// humans watching a console.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{formatted}")
    }
}
