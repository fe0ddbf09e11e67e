//! Pool endpoint rotation, share submission and dev-fee scheduling.
//!
//! The manager owns the active [`PoolConnection`] and three workers:
//!
//! - the connection loop walks the endpoint list in order, running each
//!   endpoint's connection until it gives up, and starts over or stops
//!   according to `action_after_retries_done`;
//! - the submission loop drains the solution channel, one submission at a
//!   time, into whichever connection is active;
//! - the dev-fee loop asks the active connection to run its dev-fee cycle
//!   after a warm-up and then once an hour.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RetryAction;
use crate::error::{Error, Result};
use crate::job_source::{JobSolution, SolutionReceiver, SubmitResult};
use crate::pool::{ConnectionContext, PoolConnection, PoolKind, ProviderRegistry};
use crate::shutdown::sleep_or_cancelled;
use crate::telemetry::Telemetry;
use crate::tracing::prelude::*;

/// Pause before walking the endpoint list again.
pub const PASS_PAUSE: Duration = Duration::from_secs(5);

/// Mining time before the first dev-fee cycle.
pub const DEV_FEE_WARMUP: Duration = Duration::from_secs(5 * 60);

/// Time between dev-fee cycles.
pub const DEV_FEE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct ConnectionManager {
    context: ConnectionContext,
    registry: ProviderRegistry,
    telemetry: Arc<Telemetry>,
    endpoints: Vec<String>,
    action: RetryAction,
    active: RwLock<Option<Arc<dyn PoolConnection>>>,
}

impl ConnectionManager {
    /// Create a manager for the endpoints in `context.config`.
    ///
    /// Fails when no endpoint is configured or any endpoint names an unknown
    /// pool family.
    pub fn new(
        context: ConnectionContext,
        registry: ProviderRegistry,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let endpoints = context.config.endpoints()?;
        for url in &endpoints {
            let kind = PoolKind::from_url(url)?;
            if !registry.is_registered(kind) {
                warn!(pool = %url, kind = %kind, "No implementation for pool family, endpoint will be skipped");
            }
        }

        Ok(Self {
            action: context.config.action_after_retries_done,
            context,
            registry,
            telemetry,
            endpoints,
            active: RwLock::new(None),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// The connection currently serving, if any.
    pub fn active(&self) -> Option<Arc<dyn PoolConnection>> {
        self.active.read().clone()
    }

    fn activate(&self, connection: Option<Arc<dyn PoolConnection>>) {
        *self.active.write() = connection.clone();
        self.telemetry.register_connection(connection);
    }

    /// Run all workers until shutdown or until every endpoint has failed
    /// under a policy that does not retry.
    pub async fn run(self: Arc<Self>, solutions: SolutionReceiver) -> Result<()> {
        let workers = self.context.shutdown.child_token();
        let tracker = TaskTracker::new();

        tracker.spawn({
            let manager = self.clone();
            let stop = workers.clone();
            async move { manager.run_submissions(solutions, stop).await }
        });
        tracker.spawn({
            let manager = self.clone();
            let stop = workers.clone();
            async move { manager.run_dev_fee(stop).await }
        });
        tracker.close();

        let result = self.run_connections().await;

        workers.cancel();
        tracker.wait().await;
        result
    }

    /// Walk the endpoint list until cancelled.
    ///
    /// Returns [`Error::PoolsExhausted`] once a full pass has failed and the
    /// configured action is anything but `RETRY`.
    pub async fn run_connections(&self) -> Result<()> {
        let shutdown = &self.context.shutdown;

        loop {
            for url in &self.endpoints {
                if shutdown.is_cancelled() {
                    return Ok(());
                }

                let connection = match self.registry.build(url, &self.context) {
                    Ok(connection) => connection,
                    Err(e) => {
                        error!(pool = %url, error = %e, "Cannot create pool connection");
                        continue;
                    }
                };

                self.activate(Some(connection.clone()));
                info!(pool = %url, kind = %connection.kind(), "Using pool");
                if let Err(e) = connection.run(url).await {
                    error!(pool = %url, error = %e, "Pool connection gave up");
                }
                self.activate(None);
                connection.dispose();
            }

            if shutdown.is_cancelled() {
                return Ok(());
            }

            if !self.action.keeps_reconnecting() {
                error!(action = %self.action, "All pools failed");
                return Err(Error::PoolsExhausted);
            }

            warn!(pause_secs = PASS_PAUSE.as_secs(), "All pools failed, starting over");
            if sleep_or_cancelled(shutdown, PASS_PAUSE).await {
                return Ok(());
            }
        }
    }

    /// Submit solutions one at a time until the channel closes or `stop` is
    /// cancelled.
    pub async fn run_submissions(&self, mut solutions: SolutionReceiver, stop: CancellationToken) {
        loop {
            let solution = tokio::select! {
                _ = stop.cancelled() => break,
                solution = solutions.recv() => match solution {
                    Some(solution) => solution,
                    None => break,
                },
            };
            self.submit(solution).await;
        }
        trace!("Submission loop stopped");
    }

    async fn submit(&self, solution: JobSolution) {
        let share = self.telemetry.record_submitted();

        let Some(connection) = self.active() else {
            self.telemetry.record_dropped();
            warn!(share, "No pool connection, share dropped");
            return;
        };

        let started = Instant::now();
        let result = connection.submit(&solution).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(SubmitResult::Accepted) => {
                self.telemetry.record_accepted();
                info!(share, elapsed_ms, "Share accepted");
            }
            Ok(SubmitResult::Rejected) => {
                self.telemetry.record_rejected();
                warn!(share, elapsed_ms, "Share rejected");
            }
            Ok(SubmitResult::Timeout) => {
                self.telemetry.record_dropped();
                warn!(share, elapsed_ms, "Share timed out waiting for pool");
            }
            Err(e) => {
                self.telemetry.record_dropped();
                error!(share, elapsed_ms, error = %e, "Share submission failed");
            }
        }
    }

    /// Trigger the active connection's dev-fee cycle on schedule until
    /// `stop` is cancelled.
    pub async fn run_dev_fee(&self, stop: CancellationToken) {
        if sleep_or_cancelled(&stop, DEV_FEE_WARMUP).await {
            return;
        }

        loop {
            if let Some(connection) = self.active() {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = connection.run_dev_fee() => {}
                }
            } else {
                debug!("No pool connection, skipping dev fee");
            }

            if sleep_or_cancelled(&stop, DEV_FEE_INTERVAL).await {
                break;
            }
        }
        trace!("Dev fee loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UrlSetting};
    use crate::job_source::{job_channel, solution_channel, AlgorithmPolicy};
    use crate::pool::ConnectionState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the fake pools saw, shared across every connection built.
    #[derive(Default)]
    struct Script {
        runs: Mutex<Vec<(String, Instant)>>,
        results: Mutex<VecDeque<Result<SubmitResult>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        dev_fee_cycles: AtomicUsize,
    }

    /// Fails immediately for URLs containing "down", otherwise serves until
    /// shut down.
    struct FakePool {
        script: Arc<Script>,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl PoolConnection for FakePool {
        fn kind(&self) -> PoolKind {
            PoolKind::Stratum
        }

        fn server(&self) -> Option<String> {
            None
        }

        fn protocol(&self) -> &'static str {
            "fake"
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Subscribed
        }

        async fn run(&self, url: &str) -> Result<()> {
            self.script.runs.lock().push((url.to_string(), Instant::now()));
            if url.contains("down") {
                return Err(Error::Pool("connection refused".into()));
            }
            self.shutdown.cancelled().await;
            Ok(())
        }

        async fn submit(&self, _solution: &JobSolution) -> Result<SubmitResult> {
            let now = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.script.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.script.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.script
                .results
                .lock()
                .pop_front()
                .unwrap_or(Ok(SubmitResult::Accepted))
        }

        async fn run_dev_fee(&self) {
            self.script.dev_fee_cycles.fetch_add(1, Ordering::SeqCst);
        }

        fn dispose(&self) {
            self.shutdown.cancel();
        }
    }

    fn manager(urls: &[&str], action: RetryAction) -> (Arc<ConnectionManager>, Arc<Script>) {
        let script = Arc::new(Script::default());
        let mut registry = ProviderRegistry::empty();
        registry.register(PoolKind::Stratum, {
            let script = script.clone();
            move |context: &ConnectionContext| {
                Ok(Arc::new(FakePool {
                    script: script.clone(),
                    shutdown: context.shutdown.child_token(),
                }) as Arc<dyn PoolConnection>)
            }
        });

        let config = Config {
            user: Some("wallet".into()),
            url: UrlSetting::Many(urls.iter().map(|u| u.to_string()).collect()),
            action_after_retries_done: action,
            ..Config::default()
        };
        let (jobs, _) = job_channel();
        let context = ConnectionContext {
            config: Arc::new(config),
            jobs,
            policy: AlgorithmPolicy::default(),
            shutdown: CancellationToken::new(),
        };
        let telemetry = Arc::new(Telemetry::new(1, 0));
        let manager = ConnectionManager::new(context, registry, telemetry).unwrap();
        (Arc::new(manager), script)
    }

    fn runs(script: &Script) -> Vec<(String, Instant)> {
        script.runs.lock().clone()
    }

    #[test]
    fn test_unknown_scheme_fails_construction() {
        let config = Config {
            url: UrlSetting::Many(vec!["stratum+tcp://a:1".into(), "gopher://b:2".into()]),
            ..Config::default()
        };
        let (jobs, _) = job_channel();
        let context = ConnectionContext {
            config: Arc::new(config),
            jobs,
            policy: AlgorithmPolicy::default(),
            shutdown: CancellationToken::new(),
        };
        let result = ConnectionManager::new(
            context,
            ProviderRegistry::default(),
            Arc::new(Telemetry::new(0, 0)),
        );
        assert!(matches!(result, Err(Error::UnknownPoolScheme(_))));
    }

    #[test]
    fn test_no_endpoints_fails_construction() {
        let (jobs, _) = job_channel();
        let context = ConnectionContext {
            config: Arc::new(Config::default()),
            jobs,
            policy: AlgorithmPolicy::default(),
            shutdown: CancellationToken::new(),
        };
        let result = ConnectionManager::new(
            context,
            ProviderRegistry::default(),
            Arc::new(Telemetry::new(0, 0)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_over_to_next_endpoint() {
        let (manager, script) = manager(
            &["stratum+tcp://down:1", "stratum+tcp://up:2"],
            RetryAction::Exit,
        );
        let connections = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_connections().await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        let runs = runs(&script);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, "stratum+tcp://down:1");
        assert_eq!(runs[1].0, "stratum+tcp://up:2");
        assert!(runs[1].1.duration_since(runs[0].1) < PASS_PAUSE);
        assert!(manager.active().is_some());

        manager.context.shutdown.cancel();
        assert!(connections.await.unwrap().is_ok());
        assert!(manager.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_returned() {
        let (manager, script) = manager(
            &["stratum+tcp://down:1", "stratum+tcp://down:2"],
            RetryAction::Shutdown,
        );

        let result = manager.run_connections().await;
        assert!(matches!(result, Err(Error::PoolsExhausted)));
        assert_eq!(runs(&script).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_starts_over_after_pause() {
        let (manager, script) = manager(&["stratum+tcp://down:1"], RetryAction::Retry);
        let connections = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_connections().await }
        });

        tokio::time::sleep(PASS_PAUSE * 2 + Duration::from_secs(1)).await;
        manager.context.shutdown.cancel();
        assert!(connections.await.unwrap().is_ok());

        let runs = runs(&script);
        assert_eq!(runs.len(), 3);
        for pair in runs.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= PASS_PAUSE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_family_is_skipped() {
        let (manager, script) = manager(
            &["shifu://elsewhere:1", "stratum+tcp://down:2"],
            RetryAction::Exit,
        );

        let result = manager.run_connections().await;
        assert!(matches!(result, Err(Error::PoolsExhausted)));
        assert_eq!(runs(&script).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_outcomes_are_counted() {
        let (manager, script) = manager(&["stratum+tcp://up:1"], RetryAction::Exit);

        // Nothing active yet: counted and dropped.
        manager.submit(JobSolution::new(vec![0], vec![0])).await;

        manager.activate(Some(Arc::new(FakePool {
            script: script.clone(),
            shutdown: CancellationToken::new(),
        })));
        script.results.lock().extend([
            Ok(SubmitResult::Accepted),
            Ok(SubmitResult::Rejected),
            Ok(SubmitResult::Timeout),
            Err(Error::NotConnected),
            Ok(SubmitResult::Accepted),
        ]);

        let (solutions_tx, solutions_rx) = solution_channel();
        for i in 1..=5u8 {
            solutions_tx.send(JobSolution::new(vec![i], vec![i])).unwrap();
        }
        drop(solutions_tx);
        manager
            .run_submissions(solutions_rx, CancellationToken::new())
            .await;

        let shares = manager.telemetry.shares();
        assert_eq!(shares.submitted, 6);
        assert_eq!(shares.accepted, 2);
        assert_eq!(shares.rejected, 1);
        assert_eq!(shares.dropped, 3);
        assert_eq!(script.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dev_fee_schedule() {
        let (manager, script) = manager(&["stratum+tcp://up:1"], RetryAction::Exit);
        manager.activate(Some(Arc::new(FakePool {
            script: script.clone(),
            shutdown: CancellationToken::new(),
        })));

        let stop = CancellationToken::new();
        let dev_fee = tokio::spawn({
            let manager = manager.clone();
            let stop = stop.clone();
            async move { manager.run_dev_fee(stop).await }
        });
        let cycles = || script.dev_fee_cycles.load(Ordering::SeqCst);

        tokio::time::sleep(DEV_FEE_WARMUP - Duration::from_secs(1)).await;
        assert_eq!(cycles(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cycles(), 1);

        tokio::time::sleep(DEV_FEE_INTERVAL).await;
        assert_eq!(cycles(), 2);

        stop.cancel();
        dev_fee.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_exhaustion_and_stops_workers() {
        let (manager, _script) = manager(&["stratum+tcp://down:1"], RetryAction::Exit);
        let (_solutions_tx, solutions_rx) = solution_channel();

        let result = manager.clone().run(solutions_rx).await;
        assert!(matches!(result, Err(Error::PoolsExhausted)));
        assert!(!manager.context.shutdown.is_cancelled());
    }
}
