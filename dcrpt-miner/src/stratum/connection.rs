//! Pool connection speaking the stratum-style protocol.
//!
//! A session is: TCP connect, capability negotiation, login, then a receive
//! loop that turns notifications into [`Job`]s and acknowledgements into
//! submission verdicts. When a session ends for any reason a `Stop` job is
//! published so the engines idle until new work arrives. `run` repeats
//! sessions until the configured reconnect budget is spent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::ack::{AckSlot, ACK_TIMEOUT};
use super::codec::StratumCodec;
use super::messages::{PoolMessage, Request};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job_source::{AlgorithmPolicy, Job, JobSender, JobSolution, SubmitResult};
use crate::pool::{ConnectionContext, ConnectionState, PoolConnection, PoolKind};
use crate::shutdown::sleep_or_cancelled;
use crate::tracing::prelude::*;

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Mining time the dev fee is a fraction of.
const DEV_FEE_PERIOD: Duration = Duration::from_secs(3600);

/// Display label of published jobs.
const JOB_NAME: &str = "Job";

const PROTOCOL: &str = "stratum+tcp";

/// Length of the per-instance suffix on the dev-fee login.
const WORKER_SUFFIX_LEN: usize = 6;

/// Length of the dev-fee window for a fee fraction of `period`.
fn dev_fee_window(period: Duration, fee: f64) -> Duration {
    let secs = (period.as_secs_f64() * fee).floor();
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs(secs as u64)
    } else {
        Duration::ZERO
    }
}

/// `host:port` part of a pool URL such as `stratum+tcp://host:port/`.
fn parse_server(url: &str) -> Result<String> {
    let invalid = || Error::Config(format!("invalid pool url '{url}'"));

    let (_, rest) = url.trim().split_once("://").ok_or_else(invalid)?;
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(authority.to_string())
}

fn worker_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(WORKER_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Default)]
struct SessionState {
    lifecycle: ConnectionState,
    server: Option<String>,
    /// Login used for submissions
    user: Option<String>,
    difficulty: Decimal,
    current_job: Option<Job>,
}

/// Connection to one stratum-style pool endpoint.
pub struct StratumConnection {
    config: Arc<Config>,
    policy: AlgorithmPolicy,
    jobs: JobSender,
    writer: tokio::sync::Mutex<Option<FramedWrite<OwnedWriteHalf, StratumCodec>>>,
    state: Mutex<SessionState>,
    ack: AckSlot,
    next_id: AtomicU32,
    worker_suffix: String,
    dev_fee_period: Duration,
    /// Ends this connection for good
    shutdown: CancellationToken,
    /// Ends the current session only
    session: Mutex<CancellationToken>,
}

impl StratumConnection {
    pub fn new(context: &ConnectionContext) -> Self {
        Self {
            config: context.config.clone(),
            policy: context.policy,
            jobs: context.jobs.clone(),
            writer: tokio::sync::Mutex::new(None),
            state: Mutex::new(SessionState::default()),
            ack: AckSlot::new(),
            next_id: AtomicU32::new(1),
            worker_suffix: worker_suffix(),
            dev_fee_period: DEV_FEE_PERIOD,
            shutdown: context.shutdown.child_token(),
            session: Mutex::new(CancellationToken::new()),
        }
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_lifecycle(&self, lifecycle: ConnectionState) {
        self.state.lock().lifecycle = lifecycle;
    }

    /// Drop the current session; `run` will reconnect if budget remains.
    pub fn disconnect(&self) {
        self.session.lock().cancel();
    }

    async fn send(&self, request: Request) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;
        trace!(method = request.method, id = request.id, "Sending command");
        writer.send(request).await
    }

    async fn login(&self, user: &str, password: &str) -> Result<()> {
        self.send(Request::login(self.next_id(), user, password))
            .await
    }

    /// Hand a job to the engines, waiting for channel space unless the
    /// connection is shutting down. A job that fits is always delivered,
    /// even after shutdown.
    async fn publish(&self, job: Job) {
        tokio::select! {
            biased;
            result = self.jobs.send(job) => {
                if result.is_err() {
                    debug!("Job channel closed, dropping job");
                }
            }
            _ = self.shutdown.cancelled() => {
                debug!("Shutting down with job channel full, dropping job");
            }
        }
    }

    async fn session(&self, server: &str, user: &str, password: &str) -> Result<()> {
        let session = self.shutdown.child_token();
        *self.session.lock() = session.clone();

        self.set_lifecycle(ConnectionState::Connecting);
        debug!(pool = %server, "Connecting to pool");
        let stream = tokio::select! {
            _ = session.cancelled() => return Ok(()),
            stream = TcpStream::connect(server) => stream?,
        };

        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, StratumCodec);
        *self.writer.lock().await = Some(FramedWrite::new(write_half, StratumCodec));

        self.set_lifecycle(ConnectionState::Handshaking);
        self.send(Request::capability(self.next_id())).await?;
        self.login(user, password).await?;
        self.set_lifecycle(ConnectionState::Subscribed);
        info!(pool = %server, user = %user, "Subscribed to pool");

        loop {
            tokio::select! {
                _ = session.cancelled() => return Ok(()),
                frame = frames.next() => match frame {
                    Some(Ok(messages)) => {
                        for message in messages {
                            if let Err(e) = self.handle_message(&message).await {
                                warn!(error = %e, "Skipping malformed pool message");
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Tear down the transport and tell the engines to stop.
    async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Error closing pool transport");
            }
        }
        self.set_lifecycle(ConnectionState::Closed);
        self.publish(Job::stop()).await;
    }

    async fn handle_message(&self, text: &str) -> Result<()> {
        trace!(message = %text, "Pool message");

        match PoolMessage::parse(text)? {
            PoolMessage::Notify {
                block_height,
                nonce,
            } => {
                let algorithm = self.policy.select(block_height);
                let job = {
                    let mut state = self.state.lock();
                    let job = Job::new(JOB_NAME, nonce, state.difficulty, algorithm);
                    state.current_job = Some(job.clone());
                    job
                };
                debug!(
                    job_id = %job.id,
                    block_height,
                    difficulty = %job.difficulty,
                    algorithm = %algorithm,
                    "New job from pool"
                );
                self.publish(job).await;
            }

            PoolMessage::SetDifficulty(difficulty) => {
                let retarget = {
                    let mut state = self.state.lock();
                    if state.difficulty == difficulty {
                        return Ok(());
                    }
                    state.difficulty = difficulty;
                    state.current_job.as_mut().map(|job| {
                        job.difficulty = difficulty;
                        job.clone()
                    })
                };
                debug!(difficulty = %difficulty, "Pool difficulty changed");
                if let Some(job) = retarget {
                    self.publish(job).await;
                }
            }

            PoolMessage::Ack(accepted) => self.ack.offer(accepted),

            PoolMessage::Unhandled(method) => {
                debug!(method = %method, "Ignoring unhandled notification");
            }

            PoolMessage::Ignored => {}
        }

        Ok(())
    }

    async fn dev_fee_cycle(&self) -> Result<()> {
        let Some(algorithm) = self
            .state
            .lock()
            .current_job
            .as_ref()
            .and_then(|job| job.algorithm)
        else {
            return Ok(());
        };

        let window = dev_fee_window(self.dev_fee_period, algorithm.dev_fee());
        if window.is_zero() || self.shutdown.is_cancelled() {
            return Ok(());
        }

        let (user, password) = self.config.credentials()?;
        let dev_user = format!("{}.{}", algorithm.dev_wallet(), self.worker_suffix);

        info!(seconds = window.as_secs(), "Starting dev fee");
        self.login(&dev_user, "").await?;

        if sleep_or_cancelled(&self.shutdown, window).await {
            return Ok(());
        }

        info!("Dev fee finished");
        self.login(&user, &password).await
    }
}

#[async_trait]
impl PoolConnection for StratumConnection {
    fn kind(&self) -> PoolKind {
        PoolKind::Stratum
    }

    fn server(&self) -> Option<String> {
        self.state.lock().server.clone()
    }

    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().lifecycle
    }

    async fn run(&self, url: &str) -> Result<()> {
        let (user, password) = self.config.credentials()?;
        let server = parse_server(url)?;
        {
            let mut state = self.state.lock();
            state.server = Some(server.clone());
            state.user = Some(user.clone());
        }

        let retries = self.config.retries;
        let mut last_error = None;

        for attempt in 1..=retries {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.session(&server, &user, &password).await {
                Ok(()) => {
                    info!(pool = %server, "Pool connection closed");
                    last_error = None;
                }
                Err(e) => {
                    warn!(pool = %server, attempt, retries, error = %e, "Pool connection failed");
                    last_error = Some(e);
                }
            }
            self.close().await;

            if attempt < retries {
                if sleep_or_cancelled(&self.shutdown, RECONNECT_DELAY).await {
                    return Ok(());
                }
                debug!(pool = %server, attempt, retries, "Reconnecting");
            }
        }

        match last_error {
            Some(e) if !self.shutdown.is_cancelled() => Err(e),
            _ => Ok(()),
        }
    }

    async fn submit(&self, solution: &JobSolution) -> Result<SubmitResult> {
        let user = self.state.lock().user.clone().ok_or(Error::NotConnected)?;
        let request = Request::submit(
            self.next_id(),
            &user,
            solution.nonce_hex(),
            solution.solution_hex(),
        );

        self.ack.clear();
        self.send(request).await?;

        Ok(match self.ack.wait(ACK_TIMEOUT).await {
            Some(true) => SubmitResult::Accepted,
            Some(false) => SubmitResult::Rejected,
            None => SubmitResult::Timeout,
        })
    }

    async fn run_dev_fee(&self) {
        if let Err(e) = self.dev_fee_cycle().await {
            error!(error = %e, "Dev fee cycle failed, dropping pool connection");
            self.disconnect();
        }
    }

    fn dispose(&self) {
        self.shutdown.cancel();
    }
}
