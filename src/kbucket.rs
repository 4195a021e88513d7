//! A single k-bucket: a bounded, recency-ordered contact list plus a
//! replacement cache.
//!
//! Kademlia's bucket LRU policy favors long-lived contacts: `observe`
//! never evicts a live `main` entry on its own, even when `main` is full —
//! it only ever grows the `cache`. Eviction is driven externally, by a
//! liveness signal (an RPC timeout) calling [`KBucket::evict`], which is
//! what gives a cached replacement its chance to get promoted.

use std::collections::VecDeque;

use crate::contact::NodeId;

/// A k-bucket: `main` holds live contacts (head = least-recently-seen,
/// tail = most-recently-seen); `cache` holds replacement candidates in the
/// same order.
#[derive(Debug)]
pub struct KBucket {
    k: usize,
    main: VecDeque<NodeId>,
    cache: VecDeque<NodeId>,
}

impl KBucket {
    /// Create an empty bucket with capacity `k` for both `main` and `cache`.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            main: VecDeque::with_capacity(k),
            cache: VecDeque::with_capacity(k),
        }
    }

    /// `true` iff `n` appears in `main` or `cache`.
    pub fn contains(&self, n: &NodeId) -> bool {
        self.main.contains(n) || self.cache.contains(n)
    }

    /// Number of contacts held in `main`.
    pub fn main_len(&self) -> usize {
        self.main.len()
    }

    /// Number of contacts held in `cache`.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// The central update rule: remove any existing occurrence, then place
    /// `n` at the tail of `main` if there's room, else the tail of `cache`
    /// (evicting the cache's head if the cache itself is full).
    pub fn observe(&mut self, n: NodeId) {
        self.remove_existing(&n);

        if self.main.len() < self.k {
            self.main.push_back(n);
            return;
        }

        if self.cache.len() >= self.k {
            self.cache.pop_front();
        }
        self.cache.push_back(n);
    }

    /// Remove `n` from whichever list holds it. If it was in `main`,
    /// `replace` is true, and `cache` is non-empty, promote the
    /// most-recently-seen cache entry into `main`'s tail.
    pub fn evict(&mut self, n: &NodeId, replace: bool) {
        if let Some(pos) = self.main.iter().position(|c| c == n) {
            self.main.remove(pos);
            if replace {
                if let Some(promoted) = self.cache.pop_back() {
                    self.main.push_back(promoted);
                }
            }
            return;
        }

        if let Some(pos) = self.cache.iter().position(|c| c == n) {
            self.cache.remove(pos);
        }
    }

    /// Iterate `main` most-recently-seen first (tail to head).
    pub fn ordered(&self) -> impl Iterator<Item = &NodeId> {
        self.main.iter().rev()
    }

    fn remove_existing(&mut self, n: &NodeId) {
        if let Some(pos) = self.main.iter().position(|c| c == n) {
            self.main.remove(pos);
        } else if let Some(pos) = self.cache.iter().position(|c| c == n) {
            self.cache.remove(pos);
        }
    }
}
