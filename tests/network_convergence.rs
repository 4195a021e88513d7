//! Integration test: a small ring of live nodes converges on lookups.
//!
//! Exercises the full stack end to end over real loopback UDP sockets:
//! 1. Spin up a ring of nodes, each bootstrapped off one fixed seed.
//! 2. Run a `find_node` lookup from one node for another's id and check
//!    the result is among the true k closest, with no duplicates.
//! 3. Store a value on one node, then `find_value` it from a distant one.
//! 4. Kill a node mid-lookup and verify its peers drop it from their
//!    routing tables instead of the lookup hanging or erroring out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kettle_dht::bootstrap::{bootstrap, BootstrapConfig};
use kettle_dht::codec::JsonCodec;
use kettle_dht::contact::NodeId;
use kettle_dht::id::Id;
use kettle_dht::lookup::{lookup, sort_by_distance, LookupMode, LookupResult};
use kettle_dht::node::Node;
use kettle_dht::protocol::Protocol;
use kettle_dht::routing_table::RoutingTable;
use kettle_dht::transport::UdpTransport;
use kettle_dht::{DhtError, K};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Peer {
    id: Id,
    protocol: Arc<Protocol<JsonCodec, UdpTransport>>,
    table: Arc<Mutex<RoutingTable>>,
    run: JoinHandle<()>,
}

impl Peer {
    async fn spawn() -> Self {
        let id = Id::random();
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid addr");
        let transport = UdpTransport::bind(addr).await.expect("bind");
        let bound = transport.local_addr().expect("local addr");

        let table = Arc::new(Mutex::new(RoutingTable::new(id, K)));
        let node = Arc::new(Node::new(id, bound, table.clone()));
        let handlers = node.into_handlers();

        let protocol = Arc::new(Protocol::new(
            id,
            bound,
            JsonCodec,
            transport,
            table.clone(),
            handlers,
            Duration::from_secs(2),
        ));

        let run = tokio::spawn(Arc::clone(&protocol).run());

        Peer {
            id,
            protocol,
            table,
            run,
        }
    }

    fn address(&self) -> SocketAddr {
        self.protocol.self_address()
    }

    async fn shutdown(self) {
        self.protocol.shutdown().await;
        let _ = self.run.await;
    }
}

async fn ring(size: usize) -> Vec<Peer> {
    let mut peers = Vec::with_capacity(size);
    peers.push(Peer::spawn().await);

    let seed_addr = peers[0].address();
    for _ in 1..size {
        let peer = Peer::spawn().await;
        let config = BootstrapConfig {
            seed_addresses: vec![seed_addr],
            timeout: Duration::from_secs(2),
            min_responsive_seeds: 1,
        };
        bootstrap(&peer.protocol, &peer.table, &config)
            .await
            .expect("bootstrap succeeds");
        peers.push(peer);
    }

    peers
}

/// True k closest peers to `key` among `peers`, by brute force, for
/// checking a lookup result is correct rather than merely plausible.
fn brute_force_closest(peers: &[Peer], key: Id, exclude: Id, limit: usize) -> Vec<NodeId> {
    let mut contacts: Vec<NodeId> = peers
        .iter()
        .filter(|p| p.id != exclude)
        .map(|p| NodeId::new(p.address(), p.id))
        .collect();
    sort_by_distance(&mut contacts, key);
    contacts.truncate(limit);
    contacts
}

#[tokio::test]
async fn test_find_node_converges_on_true_closest() {
    let peers = ring(24).await;

    let asker = &peers[0];
    let target_id = peers[10].id;

    let result = lookup(&asker.protocol, &asker.table, target_id, LookupMode::FindNode)
        .await
        .expect("lookup succeeds");

    let found = match result {
        LookupResult::Nodes(nodes) => nodes,
        LookupResult::Value(_) => panic!("find_node lookup should not return a value"),
    };

    // No duplicates.
    let mut seen = std::collections::HashSet::new();
    for n in &found {
        assert!(seen.insert(n.id), "lookup returned duplicate contact {:?}", n.id);
    }

    let expected = brute_force_closest(&peers, target_id, asker.id, K);
    let expected_ids: std::collections::HashSet<Id> = expected.iter().map(|n| n.id).collect();

    for n in &found {
        assert!(
            expected_ids.contains(&n.id),
            "lookup returned a contact not among the true {K} closest"
        );
    }

    // The target itself, being closest to its own id, must be found.
    assert!(
        found.iter().any(|n| n.id == target_id),
        "lookup for a live node's own id should find that node"
    );

    for peer in peers {
        peer.shutdown().await;
    }
}

#[tokio::test]
async fn test_store_then_find_value_across_the_network() {
    let peers = ring(16).await;

    let key = Id::random();
    let value = Value::String("distributed-hash-table".to_string());

    // Find the peer(s) actually closest to `key` and store there via RPC
    // from the far end of the ring, mirroring how a real client would.
    let asker = &peers[0];
    let closest_to_key = asker.table.lock().await.k_closest(key, None, K);
    assert!(!closest_to_key.is_empty());

    let mut stored_anywhere = false;
    for contact in &closest_to_key {
        if asker.protocol.store(contact.address, key, value.clone()).await.is_ok() {
            stored_anywhere = true;
        }
    }
    assert!(stored_anywhere, "at least one store RPC should succeed");

    let result = lookup(&asker.protocol, &asker.table, key, LookupMode::FindValue).await;
    match result {
        Ok(LookupResult::Value(v)) => assert_eq!(v, value),
        Ok(LookupResult::Nodes(_)) => panic!("find_value lookup should not return a node list"),
        Err(DhtError::LookupNotFound { .. }) => {
            panic!("value should have been found after an explicit store")
        }
        Err(e) => panic!("unexpected lookup error: {e}"),
    }

    for peer in peers {
        peer.shutdown().await;
    }
}

/// S5 — a peer that stops responding gets dropped from other routing
/// tables once a lookup routes through it and it fails to answer.
#[tokio::test]
async fn test_unresponsive_peer_is_evicted_during_lookup() {
    let peers = ring(8).await;
    let asker_idx = 0;
    let victim_idx = 4;

    let victim_id = peers[victim_idx].id;
    let victim_addr = peers[victim_idx].address();

    // The asker must already know the victim directly for this scenario
    // to be meaningful; seed it explicitly.
    peers[asker_idx]
        .table
        .lock()
        .await
        .update(NodeId::new(victim_addr, victim_id));
    assert!(peers[asker_idx].table.lock().await.len() >= 1);

    // Kill the victim's socket so it can no longer answer.
    let mut peers = peers;
    let victim = peers.remove(victim_idx);
    victim.shutdown().await;

    let asker = &peers[asker_idx];
    let target = Id::random();
    let _ = lookup(&asker.protocol, &asker.table, target, LookupMode::FindNode).await;

    let remaining = asker.table.lock().await.k_closest(victim_id, None, K);
    assert!(
        !remaining.iter().any(|n| n.id == victim_id),
        "unresponsive peer should have been evicted from the routing table"
    );

    for peer in peers {
        peer.shutdown().await;
    }
}
