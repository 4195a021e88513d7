//! # kettle-dht
//!
//! A Kademlia distributed hash table node: identifier algebra, routing
//! table, RPC/message protocol over an unreliable datagram transport, and
//! the iterative `find_node` / `find_value` lookup.
//!
//! This crate implements the hard parts of a Kademlia peer only. The
//! physical socket binding, the wire codec, and the logging sink are all
//! pluggable via the [`transport::Transport`] and [`codec::Codec`] traits
//! (default implementations are provided); structured logging goes through
//! `tracing`.
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | `K` (bucket size / lookup width) | 20 |
//! | `ALPHA` (lookup parallelism) | 3 |
//! | `B` (identifier width, bits) | 160 |
//! | Default RPC timeout | 10 seconds |
//!
//! ## Modules
//!
//! - [`id`] — 160-bit identifiers and the XOR metric
//! - [`contact`] — `NodeId`, the (address, id) pair used as a contact
//! - [`message`] — the request/response/error message envelope
//! - [`codec`] — byte string ↔ message encoding
//! - [`transport`] — datagram send/receive
//! - [`kbucket`] — per-distance least-recently-seen contact list
//! - [`routing_table`] — the `B`-bucket routing table
//! - [`protocol`] — request/response multiplexing over a transport
//! - [`node`] — the four RPC handlers and local key/value store
//! - [`lookup`] — the iterative, alpha-parallel convergent search
//! - [`bootstrap`] — joining a network via seed nodes

pub mod bootstrap;
pub mod codec;
pub mod contact;
pub mod id;
pub mod kbucket;
pub mod lookup;
pub mod message;
pub mod node;
pub mod protocol;
pub mod routing_table;
pub mod transport;

/// Kademlia bucket size: maximum live contacts per bucket (and lookup result width).
pub const K: usize = 20;

/// Lookup parallelism factor: number of outstanding RPCs per lookup round.
pub const ALPHA: usize = 3;

/// Identifier width in bits.
pub const B: usize = 160;

/// Default timeout for an outstanding RPC request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Error kinds produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The transport could not be reached (send failed, socket gone).
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The transport has been closed; no further sends/receives are possible.
    #[error("connection closed")]
    ConnectionClosed,

    /// A message was missing fields, had the wrong types, or an unknown `type`.
    #[error("malformed message: {0}")]
    MessageFormatError(String),

    /// Bytes could not be encoded to or decoded from a [`message::Record`].
    #[error("codec error: {0}")]
    CodecError(String),

    /// An outstanding RPC failed for a reason other than a timeout.
    #[error("rpc error: {0}")]
    RpcError(String),

    /// An outstanding RPC was not answered within its timeout.
    #[error("rpc timed out")]
    RpcTimeout,

    /// A lookup could not even seed its shortlist: the routing table was empty.
    #[error("lookup has no peers to start from")]
    LookupEmpty,

    /// A `find_value` lookup converged without locating the value.
    ///
    /// Carries the `k` closest contacts discovered, for the caller to retry
    /// a `store` against if desired.
    #[error("value not found")]
    LookupNotFound {
        /// The closest contacts discovered during the lookup.
        closest: Vec<contact::NodeId>,
    },
}

/// Convenience result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, DhtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(K, 20);
        assert_eq!(ALPHA, 3);
        assert_eq!(B, 160);
        assert_eq!(DEFAULT_REQUEST_TIMEOUT_SECS, 10);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(DhtError::RpcTimeout.to_string(), "rpc timed out");
        assert!(DhtError::ConnectionClosed.to_string().contains("closed"));
    }
}
