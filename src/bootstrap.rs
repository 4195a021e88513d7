//! Joining the network (`spec.md` section "Design Notes" / two-phase
//! bootstrap supplement, grounded in `ochra-dht`'s `bootstrap.rs`).
//!
//! Bootstrap is two phases: ping every configured seed address (so the
//! routing table learns at least one live contact per responsive seed),
//! then run a `FindNode` lookup for the local node's own id to pull in
//! everything nearby. It's built entirely on this crate's own
//! [`Protocol`]/[`RoutingTable`]/[`lookup`] — no bespoke wire format of
//! its own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::codec::Codec;
use crate::lookup::{lookup, LookupMode};
use crate::protocol::Protocol;
use crate::routing_table::RoutingTable;
use crate::transport::Transport;
use crate::{DhtError, Result};

/// Configuration for the bootstrap process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Seed addresses to contact initially.
    pub seed_addresses: Vec<SocketAddr>,
    /// Per-seed ping timeout.
    pub timeout: Duration,
    /// Minimum number of seeds that must respond for bootstrap to be
    /// considered successful. Zero means the self-lookup is attempted
    /// regardless of how many seeds answered (useful for the first node
    /// in a network, which has no seeds at all).
    pub min_responsive_seeds: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_addresses: Vec::new(),
            timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS),
            min_responsive_seeds: 0,
        }
    }
}

/// The outcome of a bootstrap attempt.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// Number of seed addresses that answered the initial ping.
    pub responsive_seeds: usize,
    /// Routing table size after bootstrap minus its size before.
    pub peers_discovered: usize,
    /// Whether bootstrap met `min_responsive_seeds` and completed the
    /// self-lookup without error.
    pub success: bool,
}

/// Ping every seed, then self-lookup to populate the routing table.
///
/// A self-lookup against an empty table (no seeds configured, or none
/// responded) surfaces as [`DhtError::LookupEmpty`] — this is not
/// necessarily fatal for the caller: the first node in a network has
/// nowhere to look up and simply waits for incoming contacts instead.
pub async fn bootstrap<C: Codec, T: Transport>(
    protocol: &Protocol<C, T>,
    table: &Arc<Mutex<RoutingTable>>,
    config: &BootstrapConfig,
) -> Result<BootstrapResult> {
    let before = table.lock().await.len();

    let mut responsive_seeds = 0;
    for &seed in &config.seed_addresses {
        match protocol.ping(seed).await {
            Ok(seed_id) => {
                info!(address = %seed, id = %seed_id, "seed responded to ping");
                responsive_seeds += 1;
            }
            Err(e) => {
                warn!(address = %seed, error = %e, "seed did not respond to ping");
            }
        }
    }

    if responsive_seeds < config.min_responsive_seeds {
        warn!(
            responsive_seeds,
            required = config.min_responsive_seeds,
            "too few responsive seeds; skipping self-lookup"
        );
        return Ok(BootstrapResult {
            responsive_seeds,
            peers_discovered: 0,
            success: false,
        });
    }

    let self_id = protocol.self_id();
    let lookup_outcome = lookup(protocol, table, self_id, LookupMode::FindNode).await;

    let success = match lookup_outcome {
        Ok(_) => true,
        Err(DhtError::LookupEmpty) => config.seed_addresses.is_empty(),
        Err(e) => {
            warn!(error = %e, "self-lookup failed during bootstrap");
            false
        }
    };

    let after = table.lock().await.len();
    Ok(BootstrapResult {
        responsive_seeds,
        peers_discovered: after.saturating_sub(before),
        success,
    })
}
