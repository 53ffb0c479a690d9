//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used by the Arxen runtime
//! and transports into a single [`NodeConfig`] with documented defaults and presets.

use core::time::Duration;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the runtime's channels and queues
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelConfig {
    /// Buffer size for the router intake (sessions, chat registry → router)
    pub intake_buffer_size: usize,
    /// Capacity of each peer's outbound queue (router → session)
    pub peer_queue_size: usize,
    /// Buffer size of each chat's live message broadcast
    pub subscriber_buffer_size: usize,
    /// Buffer size of the node event broadcast
    pub event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            intake_buffer_size: 256,    // Inbound traffic from all sessions can be bursty
            peer_queue_size: 64,        // Per-peer backlog kept while disconnected
            subscriber_buffer_size: 128, // Lagging subscribers skip beyond this
            event_buffer_size: 64,      // UI updates need responsiveness
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            intake_buffer_size: 100,
            peer_queue_size: 100,
            subscriber_buffer_size: 100,
            event_buffer_size: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Supervisor Configuration
// ----------------------------------------------------------------------------

/// Connection supervisor timing
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SupervisorConfig {
    /// Period between reconciliation passes over the peer registry
    pub reconcile_interval: Duration,
    /// Upper bound for a single outbound connection attempt
    pub connect_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Configuration
// ----------------------------------------------------------------------------

/// Outbound delivery policy
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeliveryConfig {
    /// How long the router waits on a full peer queue before dropping the envelope
    pub send_timeout: Duration,
    /// Grace period for tasks to finish after shutdown is signalled
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

// ----------------------------------------------------------------------------
// Gossip Configuration
// ----------------------------------------------------------------------------

/// Chat advertisement behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GossipConfig {
    /// Re-advertise owned chats on this period; `None` advertises once at creation
    pub readvertise_interval: Option<Duration>,
}

// ----------------------------------------------------------------------------
// Node Configuration
// ----------------------------------------------------------------------------

/// Complete runtime configuration for one node
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeConfig {
    pub channels: ChannelConfig,
    pub supervisor: SupervisorConfig,
    pub delivery: DeliveryConfig,
    pub gossip: GossipConfig,
}

impl NodeConfig {
    /// Fast timers and roomy buffers for tests
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            supervisor: SupervisorConfig {
                reconcile_interval: Duration::from_millis(50),
                connect_timeout: Duration::from_millis(500),
            },
            delivery: DeliveryConfig {
                send_timeout: Duration::from_millis(200),
                shutdown_timeout: Duration::from_secs(1),
            },
            gossip: GossipConfig::default(),
        }
    }

    /// Shorter reconnect period for LAN deployments
    pub fn low_latency() -> Self {
        Self {
            supervisor: SupervisorConfig {
                reconcile_interval: Duration::from_secs(2),
                connect_timeout: Duration::from_secs(1),
            },
            delivery: DeliveryConfig {
                send_timeout: Duration::from_millis(500),
                ..DeliveryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.intake_buffer_size == 0 {
            return Err("Intake buffer size cannot be zero".into());
        }
        if self.channels.peer_queue_size == 0 {
            return Err("Peer queue size cannot be zero".into());
        }
        if self.channels.subscriber_buffer_size == 0 {
            return Err("Subscriber buffer size cannot be zero".into());
        }
        if self.channels.event_buffer_size == 0 {
            return Err("Event buffer size cannot be zero".into());
        }
        if self.supervisor.reconcile_interval.is_zero() {
            return Err("Reconcile interval cannot be zero".into());
        }
        if self.supervisor.connect_timeout.is_zero() {
            return Err("Connect timeout cannot be zero".into());
        }
        if self.delivery.send_timeout.is_zero() {
            return Err("Send timeout cannot be zero".into());
        }
        if let Some(interval) = self.gossip.readvertise_interval {
            if interval.is_zero() {
                return Err("Readvertise interval cannot be zero".into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(NodeConfig::default().validate().is_ok());
        assert!(NodeConfig::testing().validate().is_ok());
        assert!(NodeConfig::low_latency().validate().is_ok());
    }

    #[test]
    fn test_default_reconcile_period() {
        let config = NodeConfig::default();
        assert_eq!(
            config.supervisor.reconcile_interval,
            Duration::from_secs(10)
        );
        assert!(config.gossip.readvertise_interval.is_none());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = NodeConfig::default();
        config.channels.peer_queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.gossip.readvertise_interval = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
