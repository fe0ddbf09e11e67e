//! Mining pool connectivity.
//!
//! Every pool family speaks its own protocol behind the same
//! [`PoolConnection`] contract. The family is picked from the endpoint URL's
//! prefix through a [`ProviderRegistry`], which the connection manager
//! consults once per endpoint attempt.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use strum::Display;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job_source::{AlgorithmPolicy, JobSender, JobSolution, SubmitResult};
use crate::stratum::StratumConnection;

/// Pool families, keyed by the prefix of their endpoint URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Shifu,
    Bamboo,
    Stratum,
}

impl PoolKind {
    const ALL: [PoolKind; 3] = [PoolKind::Shifu, PoolKind::Bamboo, PoolKind::Stratum];

    pub fn prefix(&self) -> &'static str {
        match self {
            PoolKind::Shifu => "shifu",
            PoolKind::Bamboo => "bamboo",
            PoolKind::Stratum => "stratum",
        }
    }

    /// Identify the pool family of `url`, e.g. `stratum+tcp://host:port`.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        Self::ALL
            .into_iter()
            .find(|kind| {
                url.get(..kind.prefix().len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(kind.prefix()))
            })
            .ok_or_else(|| Error::UnknownPoolScheme(url.to_string()))
    }
}

/// Lifecycle of a pool connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Subscribed,
    Closed,
}

/// Diagnostic view of a connection, for status output only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    pub kind: PoolKind,
    pub server: Option<String>,
    pub protocol: &'static str,
    pub state: ConnectionState,
}

/// Contract shared by all pool protocol implementations.
///
/// `submit` must not be called concurrently on one connection: the pool
/// answers without correlating responses to requests, so a connection can
/// only track one outstanding submission. The connection manager drains
/// solutions from a single task to uphold this.
#[async_trait]
pub trait PoolConnection: Send + Sync {
    fn kind(&self) -> PoolKind;

    /// `host:port` of the endpoint being served, once `run` has started
    fn server(&self) -> Option<String>;

    /// Protocol label, e.g. `stratum+tcp`
    fn protocol(&self) -> &'static str;

    fn state(&self) -> ConnectionState;

    fn status(&self) -> PoolStatus {
        PoolStatus {
            kind: self.kind(),
            server: self.server(),
            protocol: self.protocol(),
            state: self.state(),
        }
    }

    /// Connect to `url` and serve it, reconnecting internally, until the
    /// reconnect budget is spent or the connection is cancelled.
    async fn run(&self, url: &str) -> Result<()>;

    /// Submit a solution and wait for the pool's verdict.
    async fn submit(&self, solution: &JobSolution) -> Result<SubmitResult>;

    /// Mine for the developer for the active algorithm's fee window, then
    /// switch back to the configured credentials.
    async fn run_dev_fee(&self);

    /// Stop all activity. Idempotent.
    fn dispose(&self);
}

/// Everything a connection needs from its owner.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<Config>,
    pub jobs: JobSender,
    pub policy: AlgorithmPolicy,
    pub shutdown: CancellationToken,
}

pub type ConnectionBuilder =
    Box<dyn Fn(&ConnectionContext) -> Result<Arc<dyn PoolConnection>> + Send + Sync>;

/// Maps pool families to constructors.
pub struct ProviderRegistry {
    builders: HashMap<PoolKind, ConnectionBuilder>,
}

impl ProviderRegistry {
    /// Create a registry with no implementations.
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: PoolKind, builder: F)
    where
        F: Fn(&ConnectionContext) -> Result<Arc<dyn PoolConnection>> + Send + Sync + 'static,
    {
        self.builders.insert(kind, Box::new(builder));
    }

    pub fn is_registered(&self, kind: PoolKind) -> bool {
        self.builders.contains_key(&kind)
    }

    /// Construct a connection for `url`.
    ///
    /// Fails for unknown prefixes and for known families with no registered
    /// implementation.
    pub fn build(&self, url: &str, context: &ConnectionContext) -> Result<Arc<dyn PoolConnection>> {
        let kind = PoolKind::from_url(url)?;
        let builder = self
            .builders
            .get(&kind)
            .ok_or_else(|| Error::Pool(format!("no implementation for {kind} pools")))?;
        builder(context)
    }
}

impl Default for ProviderRegistry {
    /// Registry with every protocol this crate implements.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(PoolKind::Stratum, |context| {
            Ok(Arc::new(StratumConnection::new(context)) as Arc<dyn PoolConnection>)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_source::job_channel;
    use test_case::test_case;

    fn context() -> ConnectionContext {
        let (jobs, _) = job_channel();
        ConnectionContext {
            config: Arc::new(Config::default()),
            jobs,
            policy: AlgorithmPolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    #[test_case("stratum+tcp://pool.example.com:3333", PoolKind::Stratum ; "stratum tcp")]
    #[test_case("STRATUM+TCP://pool.example.com:3333", PoolKind::Stratum ; "upper case")]
    #[test_case("  stratum://pool:1", PoolKind::Stratum ; "leading whitespace")]
    #[test_case("shifu://pool:80", PoolKind::Shifu ; "shifu")]
    #[test_case("bamboo://pool:80", PoolKind::Bamboo ; "bamboo")]
    fn test_kind_from_url(url: &str, expected: PoolKind) {
        assert_eq!(PoolKind::from_url(url).unwrap(), expected);
    }

    #[test_case("http://pool:80" ; "http")]
    #[test_case("" ; "empty")]
    #[test_case("strat" ; "truncated prefix")]
    fn test_unknown_scheme(url: &str) {
        assert!(matches!(
            PoolKind::from_url(url),
            Err(Error::UnknownPoolScheme(_))
        ));
    }

    #[test]
    fn test_default_registry_builds_stratum() {
        let registry = ProviderRegistry::default();
        let connection = registry
            .build("stratum+tcp://127.0.0.1:1", &context())
            .unwrap();
        assert_eq!(connection.kind(), PoolKind::Stratum);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_unregistered_family_fails_construction() {
        let registry = ProviderRegistry::default();
        assert!(!registry.is_registered(PoolKind::Shifu));
        assert!(matches!(
            registry.build("shifu://pool:80", &context()),
            Err(Error::Pool(_))
        ));
    }

    #[test]
    fn test_unknown_prefix_fails_construction() {
        let registry = ProviderRegistry::default();
        assert!(matches!(
            registry.build("ftp://pool:21", &context()),
            Err(Error::UnknownPoolScheme(_))
        ));
    }

    #[test]
    fn test_status_reflects_connection() {
        let connection = ProviderRegistry::default()
            .build("stratum+tcp://127.0.0.1:1", &context())
            .unwrap();
        let status = connection.status();
        assert_eq!(status.protocol, "stratum+tcp");
        assert_eq!(status.server, None);
        assert_eq!(
            serde_json::to_value(&status).unwrap()["state"],
            "disconnected"
        );
    }
}
