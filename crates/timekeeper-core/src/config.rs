//! Coordination protocol configuration.
//!
//! Every timeout, interval, and cap used by the controller and node loops.

use std::time::Duration;

use serde::Deserialize;

use timekeeper_common::{DEFAULT_MAX_MEMBERS, MAX_ADDRESSES};

/// What the controller does with a registration that would exceed `max_members`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionPolicy {
    /// Log and drop the registration; it is not relayed to the leader
    #[default]
    Reject,
    /// Log a warning and admit anyway, up to the wire limit of 16 addresses
    #[serde(alias = "warn_and_admit")]
    WarnAndAdmit,
}

/// Coordination protocol configuration
#[derive(Clone, Debug)]
pub struct CoordinationConfig {
    /// Controller wait for an inbound connection before re-electing.
    /// Default: 5s
    pub controller_accept_timeout: Duration,

    /// Heartbeat age after which the leader is considered silent.
    /// Default: 6s
    pub leader_stale_after: Duration,

    /// Connect timeout when relaying a registration to the leader.
    /// Default: 1s
    pub relay_connect_timeout: Duration,

    /// Connect timeout when offering leadership to a candidate.
    /// Default: 100ms
    pub election_connect_timeout: Duration,

    /// Connect timeout for a node's registration at startup.
    /// Default: 1s
    pub startup_connect_timeout: Duration,

    /// Client wait for contact before assuming it has been orphaned.
    /// Default: 10s
    pub client_accept_timeout: Duration,

    /// Leader wait for a relayed registration before broadcasting.
    /// Default: 1s
    pub server_accept_timeout: Duration,

    /// Minimum time between two time broadcasts.
    /// Default: 1s
    pub broadcast_interval: Duration,

    /// Connect timeout when broadcasting time to a peer.
    /// Default: 100ms
    pub broadcast_connect_timeout: Duration,

    /// Connect timeout when reporting time to the controller.
    /// Default: 100ms
    pub controller_report_timeout: Duration,

    /// Consecutive failed reports the leader tolerates before giving up.
    /// Default: 6
    pub max_controller_report_failures: u32,

    /// Membership cap enforced by the controller.
    /// Default: 16
    pub max_members: usize,

    /// Behaviour when the membership cap is reached.
    /// Default: reject
    pub admission_policy: AdmissionPolicy,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            controller_accept_timeout: Duration::from_secs(5),
            leader_stale_after: Duration::from_secs(6),
            relay_connect_timeout: Duration::from_secs(1),
            election_connect_timeout: Duration::from_millis(100),
            startup_connect_timeout: Duration::from_secs(1),
            client_accept_timeout: Duration::from_secs(10),
            server_accept_timeout: Duration::from_secs(1),
            broadcast_interval: Duration::from_secs(1),
            broadcast_connect_timeout: Duration::from_millis(100),
            controller_report_timeout: Duration::from_millis(100),
            max_controller_report_failures: 6,
            max_members: DEFAULT_MAX_MEMBERS,
            admission_policy: AdmissionPolicy::Reject,
        }
    }
}

impl CoordinationConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the controller accept timeout.
    pub fn with_controller_accept_timeout(mut self, timeout: Duration) -> Self {
        self.controller_accept_timeout = timeout;
        self
    }

    /// Set the leader staleness threshold.
    pub fn with_leader_stale_after(mut self, after: Duration) -> Self {
        self.leader_stale_after = after;
        self
    }

    /// Set the client orphan timeout.
    pub fn with_client_accept_timeout(mut self, timeout: Duration) -> Self {
        self.client_accept_timeout = timeout;
        self
    }

    /// Set the broadcast interval.
    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    /// Set the controller report retry cap.
    pub fn with_max_controller_report_failures(mut self, max: u32) -> Self {
        self.max_controller_report_failures = max;
        self
    }

    /// Set the membership cap.
    pub fn with_max_members(mut self, max: usize) -> Self {
        self.max_members = max;
        self
    }

    /// Set the admission policy.
    pub fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission_policy = policy;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("controller_accept_timeout", self.controller_accept_timeout),
            ("leader_stale_after", self.leader_stale_after),
            ("relay_connect_timeout", self.relay_connect_timeout),
            ("election_connect_timeout", self.election_connect_timeout),
            ("startup_connect_timeout", self.startup_connect_timeout),
            ("client_accept_timeout", self.client_accept_timeout),
            ("server_accept_timeout", self.server_accept_timeout),
            ("broadcast_interval", self.broadcast_interval),
            ("broadcast_connect_timeout", self.broadcast_connect_timeout),
            ("controller_report_timeout", self.controller_report_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::InvalidValue(format!("{} must be > 0", name)));
        }
        if self.leader_stale_after <= self.broadcast_interval {
            return Err(ConfigError::InvalidValue(
                "leader_stale_after must be > broadcast_interval".into(),
            ));
        }
        if self.max_members == 0 || self.max_members > MAX_ADDRESSES {
            return Err(ConfigError::InvalidValue(format!(
                "max_members must be within 1..={}",
                MAX_ADDRESSES
            )));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
