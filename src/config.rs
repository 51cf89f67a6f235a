use std::net::SocketAddr;
use std::time::Duration;

/// Default port the agent state API listens on, and the port used to reach peers.
pub const DEFAULT_API_PORT: u16 = 4500;

/// Whole-phase retry settings for the secondary execution path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub delay_ms: u64,
    /// Upper bound of random jitter added to the delay.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

/// Timeouts and intervals for the coordination protocol.
///
/// Poll intervals are kept small relative to the state timeouts so that a
/// timeout window covers a few hundred polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub poll_interval_ms: u64,
    /// Bound for state-confirmation polls (reset confirmed, start confirmed).
    pub state_timeout_ms: u64,
    /// Bound for waiting on the peer heartbeat and eventing API.
    pub peer_online_timeout_ms: u64,
    /// Fresh scope given to the best-effort final reset.
    pub cleanup_timeout_ms: u64,
    /// Per HTTP request timeout for the state store client.
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub instruction_queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            state_timeout_ms: 30 * 60 * 1_000,
            peer_online_timeout_ms: 60 * 60 * 1_000,
            cleanup_timeout_ms: 2 * 60 * 1_000,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            instruction_queue_capacity: 16,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }

    pub fn peer_online_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_online_timeout_ms)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Tight timings for tests and local experiments.
    pub fn fast() -> Self {
        Self {
            poll_interval_ms: 20,
            state_timeout_ms: 2_000,
            peer_online_timeout_ms: 2_000,
            cleanup_timeout_ms: 1_000,
            request_timeout_ms: 1_000,
            retry: RetryConfig {
                retries: 1,
                delay_ms: 0,
                jitter_ms: 0,
            },
            instruction_queue_capacity: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier of this host in the run topology.
    pub host_id: String,
    pub listen_addr: SocketAddr,
    /// Port peers serve their state API on.
    pub api_port: u16,
    pub coordinator: CoordinatorConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_id: "localhost".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)),
            api_port: DEFAULT_API_PORT,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(host_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            host_id: host_id.into(),
            listen_addr,
            api_port: listen_addr.port(),
            ..Default::default()
        }
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_api_port(mut self, api_port: u16) -> Self {
        self.api_port = api_port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_default() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.delay_ms, 0);
        assert_eq!(cfg.jitter_ms, 0);
    }

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.state_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(cfg.peer_online_timeout(), Duration::from_secs(60 * 60));
        assert_eq!(cfg.cleanup_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.instruction_queue_capacity, 16);
    }

    #[test]
    fn default_poll_interval_gives_enough_polls_per_window() {
        let cfg = CoordinatorConfig::default();
        assert!(cfg.state_timeout_ms / cfg.poll_interval_ms >= 100);
        assert!(cfg.peer_online_timeout_ms / cfg.poll_interval_ms >= 100);
    }

    #[test]
    fn agent_config_default() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.host_id, "localhost");
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:4500");
        assert_eq!(cfg.api_port, DEFAULT_API_PORT);
    }

    #[test]
    fn agent_config_new_uses_listen_port_for_peers() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = AgentConfig::new("vm-1", addr);
        assert_eq!(cfg.host_id, "vm-1");
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.api_port, 9000);
    }

    #[test]
    fn agent_config_builders() {
        let cfg = AgentConfig::default()
            .with_api_port(4600)
            .with_coordinator(CoordinatorConfig::fast());
        assert_eq!(cfg.api_port, 4600);
        assert_eq!(cfg.coordinator.poll_interval_ms, 20);
        assert_eq!(cfg.coordinator.retry.retries, 1);
    }
}
