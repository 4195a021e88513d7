//! The request/response/error message envelope exchanged between peers.
//!
//! A [`Message`] carries a `type`, the sender's origin id/address, the RPC
//! name, a correlating `rpc_id`, and an ordered payload. `rpc_id` is
//! generated fresh by [`Message::request`] and echoed unchanged by
//! [`Message::response`]/[`Message::error`], which is how
//! [`crate::protocol::Protocol`] matches a response back to its request.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::Id;

/// The three message kinds that can appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// An RPC request awaiting a response.
    Request,
    /// A successful RPC response, correlated by `rpc_id`.
    Response,
    /// An error response, correlated by `rpc_id`.
    Error,
}

/// A message exchanged between two peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// One of `request`, `response`, `error`.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// The identifier of the node that produced this message.
    pub node_id: Id,
    /// The network address of the node that produced this message.
    #[serde(with = "socket_addr_serde")]
    pub address: SocketAddr,
    /// The name of the RPC this message concerns (e.g. `ping`, `find_node`).
    pub rpc: String,
    /// Correlates a response/error back to the request that produced it.
    pub rpc_id: Id,
    /// Ordered arguments (request) or return values (response/error).
    /// Schema is fixed per `rpc`.
    pub payload: Vec<Value>,
}

impl Message {
    /// Build a request message with a fresh, random `rpc_id`.
    pub fn request(
        origin_id: Id,
        origin_address: SocketAddr,
        rpc: impl Into<String>,
        payload: Vec<Value>,
    ) -> Self {
        Self {
            kind: MessageType::Request,
            node_id: origin_id,
            address: origin_address,
            rpc: rpc.into(),
            rpc_id: Id::random(),
            payload,
        }
    }

    /// Build a response message, echoing the request's `rpc_id`.
    pub fn response(
        origin_id: Id,
        origin_address: SocketAddr,
        rpc: impl Into<String>,
        rpc_id: Id,
        payload: Vec<Value>,
    ) -> Self {
        Self {
            kind: MessageType::Response,
            node_id: origin_id,
            address: origin_address,
            rpc: rpc.into(),
            rpc_id,
            payload,
        }
    }

    /// Build an error message, echoing the request's `rpc_id`.
    pub fn error(
        origin_id: Id,
        origin_address: SocketAddr,
        rpc: impl Into<String>,
        rpc_id: Id,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageType::Error,
            node_id: origin_id,
            address: origin_address,
            rpc: rpc.into(),
            rpc_id,
            payload: vec![Value::String(reason.into())],
        }
    }

    /// The sender's contact, synthesized from the origin fields.
    pub fn origin(&self) -> crate::contact::NodeId {
        crate::contact::NodeId::new(self.address, self.node_id)
    }
}

/// Serde support for `SocketAddr` as a `host:port` string, so identifiers
/// and addresses both round-trip losslessly through a JSON codec.
mod socket_addr_serde {
    use std::net::SocketAddr;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
