//! The `B`-bucket routing table.
//!
//! Bucket `i` nominally holds contacts whose XOR distance from `self_id`
//! has its most-significant set bit at position `i` ([`crate::id::bit_index`]).
//! `closest` approximates ascending-XOR-distance order by walking buckets
//! in a zig-zag out from the bucket that would hold the query key — the
//! canonical Kademlia heuristic, ported directly from `find_closest_buckets`
//! in the `kettle` DHT this crate descends from.

use crate::contact::{NodeId, Triple};
use crate::id::{bit_index, Id};
use crate::kbucket::KBucket;

/// `self_id` plus a fixed vector of `B` [`KBucket`]s indexed by distance bit.
pub struct RoutingTable {
    self_id: Id,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Build an empty table for `self_id`, with `k` as each bucket's capacity.
    pub fn new(self_id: Id, k: usize) -> Self {
        let buckets = (0..crate::B).map(|_| KBucket::new(k)).collect();
        Self { self_id, buckets }
    }

    /// The local node's identifier.
    pub fn self_id(&self) -> Id {
        self.self_id
    }

    /// Total number of contacts held across all buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.main_len() + b.cache_len())
            .sum()
    }

    /// `true` iff the table holds no contacts at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observe `n`. No-op if `n.id == self_id`.
    pub fn update(&mut self, n: NodeId) {
        if n.id == self.self_id {
            return;
        }
        let index = bucket_index(self.self_id, n.id);
        self.buckets[index].observe(n);
    }

    /// Remove `n`, promoting a cached replacement if one exists. No-op if
    /// `n.id == self_id`.
    pub fn remove(&mut self, n: &NodeId) {
        if n.id == self.self_id {
            return;
        }
        let index = bucket_index(self.self_id, n.id);
        self.buckets[index].evict(n, true);
    }

    /// Yield contacts in approximate ascending-XOR-distance order from
    /// `key`, skipping `exclude` (and never yielding `self_id`, which never
    /// appears in the table).
    pub fn closest<'a>(
        &'a self,
        key: Id,
        exclude: Option<NodeId>,
    ) -> impl Iterator<Item = NodeId> + 'a {
        let start = if key == self.self_id {
            crate::B - 1
        } else {
            bucket_index(self.self_id, key)
        };
        zigzag(start, crate::B)
            .into_iter()
            .flat_map(move |i| self.buckets[i].ordered().copied())
            .filter(move |n| Some(*n) != exclude)
    }

    /// The first `limit` of [`RoutingTable::closest`].
    pub fn k_closest(&self, key: Id, exclude: Option<NodeId>, limit: usize) -> Vec<NodeId> {
        self.closest(key, exclude).take(limit).collect()
    }

    /// [`RoutingTable::k_closest`], materialized as wire triples.
    pub fn k_closest_triples(&self, key: Id, exclude: Option<NodeId>, limit: usize) -> Vec<Triple> {
        self.k_closest(key, exclude, limit)
            .into_iter()
            .map(NodeId::to_triple)
            .collect()
    }
}

/// The bucket index for a contact at XOR distance `bit_index(a, b)` from
/// `a`, treating the (should-never-happen, since callers short-circuit on
/// `a == b`) coincident case as bucket `B - 1`.
fn bucket_index(a: Id, b: Id) -> usize {
    bit_index(&a, &b).unwrap_or(crate::B - 1)
}

/// Bucket visitation order: `start, start+1, start-1, start+2, start-2, …`
/// clamped to `[0, b)`.
fn zigzag(start: usize, b: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(b);
    let mut down = (0..=start).rev();
    let mut up = (start + 1)..b;
    loop {
        let d = down.next();
        let u = up.next();
        if d.is_none() && u.is_none() {
            break;
        }
        if let Some(d) = d {
            out.push(d);
        }
        if let Some(u) = u {
            out.push(u);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_msb_byte(byte0: u8) -> Id {
        let mut bytes = [0u8; 20];
        bytes[0] = byte0;
        Id::from_bytes(bytes)
    }

    fn node(id: Id, port: u16) -> NodeId {
        let addr = format!("127.0.0.1:{port}").parse().expect("valid addr");
        NodeId::new(addr, id)
    }

    #[test]
    fn test_zigzag_order() {
        assert_eq!(zigzag(5, 10), vec![5, 6, 4, 7, 3, 8, 2, 9, 1, 0]);
        assert_eq!(zigzag(0, 3), vec![0, 1, 2]);
    }

    /// S1 — bucket placement: self_id=0; 0x01 -> bucket 0; 0x88 -> bucket 7
    /// (as the top byte, i.e. id = 0x88 << 152); 0x1000 -> bucket 12.
    #[test]
    fn test_s1_bucket_placement() {
        let table = RoutingTable::new(Id::ZERO, 20);

        let mut bytes = [0u8; 20];
        bytes[19] = 0x01;
        assert_eq!(bucket_index(table.self_id(), Id::from_bytes(bytes)), 0);

        let mut bytes = [0u8; 20];
        bytes[19] = 0x88;
        assert_eq!(bucket_index(table.self_id(), Id::from_bytes(bytes)), 7);

        let mut bytes = [0u8; 20];
        bytes[18] = 0x10;
        assert_eq!(bucket_index(table.self_id(), Id::from_bytes(bytes)), 12);
    }

    #[test]
    fn test_self_never_in_table() {
        let mut table = RoutingTable::new(Id::ZERO, 20);
        table.update(node(Id::ZERO, 1));
        assert!(table.is_empty());
    }

    #[test]
    fn test_update_then_closest_excludes_self_and_dedups() {
        let self_id = Id::ZERO;
        let mut table = RoutingTable::new(self_id, 20);
        let a = node(id_with_msb_byte(0x80), 1);
        let b = node(id_with_msb_byte(0x40), 2);
        table.update(a);
        table.update(b);

        let closest = table.k_closest(self_id, None, 10);
        assert_eq!(closest.len(), 2);
        assert!(closest.contains(&a));
        assert!(closest.contains(&b));
        assert!(!closest.contains(&node(self_id, 3)));
    }

    #[test]
    fn test_closest_honors_exclude() {
        let self_id = Id::ZERO;
        let mut table = RoutingTable::new(self_id, 20);
        let a = node(id_with_msb_byte(0x80), 1);
        table.update(a);

        let closest = table.k_closest(self_id, Some(a), 10);
        assert!(closest.is_empty());
    }

    #[test]
    fn test_remove_promotes_cache_replacement() {
        let self_id = Id::ZERO;
        let mut table = RoutingTable::new(self_id, 1);
        let x = node(id_with_msb_byte(0x80), 1);
        let y = node(id_with_msb_byte(0x80), 2);
        table.update(x);
        table.update(y);
        assert_eq!(table.len(), 2);

        table.remove(&x);
        assert_eq!(table.len(), 1);
        let closest = table.k_closest(self_id, None, 10);
        assert_eq!(closest, vec![y]);
    }

    #[test]
    fn test_k_closest_triples_roundtrip_addresses() {
        let self_id = Id::ZERO;
        let mut table = RoutingTable::new(self_id, 20);
        let a = node(id_with_msb_byte(0x80), 4242);
        table.update(a);

        let triples = table.k_closest_triples(self_id, None, 10);
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].port, 4242);
        assert_eq!(triples[0].id, a.id);
    }
}
