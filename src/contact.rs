//! `NodeId`: a contact's address paired with its identifier.
//!
//! Two `NodeId`s are equal iff their `id` components are equal — the
//! address is carried for dialing purposes only and is updated on
//! rediscovery of the same `id` (see [`NodeId::refresh_address`]).

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// A contact in the network: where to reach it, and its identifier.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct NodeId {
    /// The contact's network address.
    pub address: SocketAddr,
    /// The contact's 160-bit identifier.
    pub id: Id,
}

impl NodeId {
    /// Build a new contact.
    pub fn new(address: SocketAddr, id: Id) -> Self {
        Self { address, id }
    }

    /// Decode a wire triple `(host, port, id)`.
    pub fn from_triple(triple: &Triple) -> Result<Self, std::net::AddrParseError> {
        let address: SocketAddr = format!("{}:{}", triple.host, triple.port).parse()?;
        Ok(Self {
            address,
            id: triple.id,
        })
    }

    /// Encode as a wire triple `(host, port, id)`.
    pub fn to_triple(self) -> Triple {
        Triple {
            host: self.address.ip().to_string(),
            port: self.address.port(),
            id: self.id,
        }
    }

    /// Replace the address on rediscovery of the same `id`.
    ///
    /// No-op if `other.id != self.id`; callers are expected to have
    /// already matched on `id` (e.g. via [`PartialEq`]).
    pub fn refresh_address(&mut self, other: &NodeId) {
        if self.id == other.id {
            self.address = other.address;
        }
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeId {}

impl std::hash::Hash for NodeId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}, {})", self.address, self.id)
    }
}

/// Wire form of a contact: `(host, port, id)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Triple {
    /// Host portion of the contact's address.
    pub host: String,
    /// Port portion of the contact's address.
    pub port: u16,
    /// The contact's identifier.
    pub id: Id,
}
