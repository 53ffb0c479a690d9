//! Connection Supervisor
//!
//! Periodically reconciles the peer registry against live sessions:
//! - claims every disconnected peer in one atomic pass
//! - spawns an outbound session attempt for each claimed peer
//!
//! The claim flips a peer to connected before the attempt starts and the session flips it
//! back when it ends, so a peer never has two outbound attempts in flight.

use arxen_core::{ArxenResult, SupervisorConfig, Transport};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::session::{OutboundSession, SessionContext};

// ----------------------------------------------------------------------------
// Connection Supervisor
// ----------------------------------------------------------------------------

/// Reconnect loop for known peers
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    ctx: SessionContext,
    reconcile_interval: Duration,
    connect_timeout: Duration,
    /// Number of reconciliation passes so far
    passes: u64,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        ctx: SessionContext,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            transport,
            ctx,
            reconcile_interval: config.reconcile_interval,
            connect_timeout: config.connect_timeout,
            passes: 0,
        }
    }

    /// Tick until shutdown; the first tick fires immediately
    pub async fn run(mut self) -> ArxenResult<()> {
        info!(
            "Connection supervisor starting (every {:?})",
            self.reconcile_interval
        );
        let mut ticker = interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => {
                    info!("Connection supervisor stopped after {} passes", self.passes);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.reconcile();
                }
            }
        }
    }

    /// Dispatch an outbound attempt for every disconnected peer
    pub fn reconcile(&mut self) -> usize {
        self.passes += 1;
        let claimed = self.ctx.peers.claim_disconnected();
        if !claimed.is_empty() {
            debug!("Dispatching {} outbound session attempts", claimed.len());
        }

        let count = claimed.len();
        for remote in claimed {
            let session = OutboundSession::new(
                remote,
                self.transport.clone(),
                self.connect_timeout,
                self.ctx.clone(),
            );
            tokio::spawn(session.run());
        }
        count
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
