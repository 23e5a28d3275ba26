use std::{net::SocketAddr, time::Duration};

use crate::{
    error::ConfigError,
    protocol::KVSTATE,
    topology::ReplicaTopology,
    transport::tcp::DEFAULT_CAPACITY,
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to start a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Socket address to bind. Port 0 picks an ephemeral port.
    pub listen: SocketAddr,
    /// Addresses that receive this node's state every tick.
    pub replicants: Vec<String>,
    pub tick_interval: Duration,
    /// Also tick as soon as a message arrives, not only on the interval.
    pub wake_on_arrival: bool,
    pub outbound_capacity: usize,
    /// Relations logged whenever their contents change.
    pub inspect: Vec<String>,
}

impl NodeConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            replicants: Vec::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            wake_on_arrival: false,
            outbound_capacity: DEFAULT_CAPACITY,
            inspect: vec![KVSTATE.to_string()],
        }
    }

    pub fn with_replicants<I, S>(mut self, replicants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replicants = replicants.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_wake_on_arrival(mut self, wake_on_arrival: bool) -> Self {
        self.wake_on_arrival = wake_on_arrival;
        self
    }

    pub fn with_inspect<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inspect = relations.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the settings and resolves the replicant set against the address
    /// the node actually bound.
    pub fn validate(&self, bound: SocketAddr) -> Result<ReplicaTopology, ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidSetting(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::InvalidSetting(
                "outbound capacity must be at least 1".to_string(),
            ));
        }
        ReplicaTopology::new(bound, &self.replicants)
    }
}
