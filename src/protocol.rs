//! Request/response multiplexing over a [`Transport`].
//!
//! `Protocol` is the actor from `spec.md` section 4.5: it owns the
//! `pending` table of outstanding requests, the inbound handler table
//! (registered explicitly at construction — see [`crate::node::Node::into_handlers`]
//! rather than discovered reflectively, per `spec.md` section 9), and the
//! four typed RPC methods (`ping`/`store`/`find_node`/`find_value`) that
//! [`crate::lookup`] and [`crate::bootstrap`] use to call out to peers.
//!
//! `send_request`'s timeout and response paths race to remove the same
//! `pending` entry; whichever gets there first wins and the loser is a
//! no-op, matching `kettle.protocol.Protocol.send_request` in the Python
//! DHT this crate is descended from.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::contact::{NodeId, Triple};
use crate::id::Id;
use crate::message::{Message, MessageType};
use crate::routing_table::RoutingTable;
use crate::transport::Transport;
use crate::{DhtError, Result};

/// A registered inbound RPC handler: given the caller's contact and the
/// request payload, produce a response payload.
pub type Handler = Box<dyn Fn(NodeId, Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>> + Send + Sync>;

/// The outcome of a remote `find_value` call.
#[derive(Debug, Clone)]
pub enum FindValueResponse {
    /// The peer had the key and returned its value.
    Found(Value),
    /// The peer didn't have the key; these are its closest known contacts.
    NotFound(Vec<Triple>),
}

/// Request/response multiplexing over one [`Transport`].
pub struct Protocol<C: Codec, T: Transport> {
    self_id: Id,
    self_address: SocketAddr,
    codec: C,
    transport: Arc<T>,
    table: Arc<Mutex<RoutingTable>>,
    pending: Mutex<HashMap<Id, oneshot::Sender<Message>>>,
    handlers: HashMap<String, Handler>,
    default_timeout: Duration,
}

impl<C: Codec, T: Transport> Protocol<C, T> {
    /// Build a protocol instance. `handlers` is the rpc-name-keyed dispatch
    /// table; `table` is shared with whatever owns the local [`crate::node::Node`]
    /// so both request handling and response receipt can call `update`.
    pub fn new(
        self_id: Id,
        self_address: SocketAddr,
        codec: C,
        transport: T,
        table: Arc<Mutex<RoutingTable>>,
        handlers: HashMap<String, Handler>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            self_id,
            self_address,
            codec,
            transport: Arc::new(transport),
            table,
            pending: Mutex::new(HashMap::new()),
            handlers,
            default_timeout,
        }
    }

    /// The local node's identifier.
    pub fn self_id(&self) -> Id {
        self.self_id
    }

    /// The local node's address, as advertised to peers.
    pub fn self_address(&self) -> SocketAddr {
        self.self_address
    }

    /// Send `msg` to `peer_address` and await its correlated response (or
    /// `RpcTimeout` if none arrives within `timeout`).
    pub async fn send_request(
        &self,
        msg: Message,
        peer_address: SocketAddr,
        timeout: Duration,
    ) -> Result<Message> {
        let rpc_id = msg.rpc_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(rpc_id, tx);

        let bytes = match self.codec.encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending.lock().await.remove(&rpc_id);
                return Err(e);
            }
        };

        if let Err(e) = self.transport.send(&bytes, peer_address).await {
            self.pending.lock().await.remove(&rpc_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(DhtError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&rpc_id);
                Err(DhtError::RpcTimeout)
            }
        }
    }

    /// Send a response (or error) message. Best-effort; failures are
    /// logged, not propagated — the original requester simply times out.
    pub async fn send_response(&self, msg: Message, peer_address: SocketAddr) {
        let bytes = match self.codec.encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, to = %peer_address, "failed to encode outgoing message");
                return;
            }
        };
        if let Err(e) = self.transport.send(&bytes, peer_address).await {
            warn!(error = %e, to = %peer_address, "failed to send outgoing message");
        }
    }

    /// Issue RPC `rpc` with `args` to `peer_address` using the default
    /// timeout, then feed the responder into the routing table.
    pub async fn call(&self, peer_address: SocketAddr, rpc: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let request = Message::request(self.self_id, self.self_address, rpc, args);
        let response = self
            .send_request(request, peer_address, self.default_timeout)
            .await?;

        self.table.lock().await.update(response.origin());

        match response.kind {
            MessageType::Response => Ok(response.payload),
            MessageType::Error => {
                let reason = response
                    .payload
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("remote error")
                    .to_string();
                Err(DhtError::RpcError(reason))
            }
            MessageType::Request => Err(DhtError::MessageFormatError(
                "expected response or error, got request".into(),
            )),
        }
    }

    /// `ping() -> self.id` on the remote peer.
    pub async fn ping(&self, peer_address: SocketAddr) -> Result<Id> {
        let payload = self.call(peer_address, "ping", vec![]).await?;
        let id_value = payload
            .into_iter()
            .next()
            .ok_or_else(|| DhtError::MessageFormatError("ping: empty payload".into()))?;
        serde_json::from_value(id_value).map_err(|e| DhtError::MessageFormatError(e.to_string()))
    }

    /// `store(key, value) -> true` on the remote peer.
    pub async fn store(&self, peer_address: SocketAddr, key: Id, value: Value) -> Result<bool> {
        let key_value = serde_json::to_value(key).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
        let payload = self
            .call(peer_address, "store", vec![key_value, value])
            .await?;
        Ok(payload.into_iter().next().and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// `find_node(key) -> [triple; <= k]` on the remote peer.
    pub async fn find_node(&self, peer_address: SocketAddr, key: Id) -> Result<Vec<Triple>> {
        let key_value = serde_json::to_value(key).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
        let payload = self.call(peer_address, "find_node", vec![key_value]).await?;
        let triples_value = payload
            .into_iter()
            .next()
            .ok_or_else(|| DhtError::MessageFormatError("find_node: empty payload".into()))?;
        serde_json::from_value(triples_value).map_err(|e| DhtError::MessageFormatError(e.to_string()))
    }

    /// `find_value(key) -> (found, data)` on the remote peer.
    pub async fn find_value(&self, peer_address: SocketAddr, key: Id) -> Result<FindValueResponse> {
        let key_value = serde_json::to_value(key).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
        let payload = self.call(peer_address, "find_value", vec![key_value]).await?;
        let mut iter = payload.into_iter();
        let found = iter
            .next()
            .and_then(|v| v.as_bool())
            .ok_or_else(|| DhtError::MessageFormatError("find_value: missing found flag".into()))?;

        let data = iter
            .next()
            .ok_or_else(|| DhtError::MessageFormatError("find_value: missing payload".into()))?;

        if found {
            Ok(FindValueResponse::Found(data))
        } else {
            let triples = serde_json::from_value(data).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
            Ok(FindValueResponse::NotFound(triples))
        }
    }

    /// Run the inbound loop until the transport is closed. Each datagram
    /// is handled in its own task so a slow handler never blocks the next
    /// `recv`.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok((bytes, source)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.on_datagram(bytes, source).await;
                    });
                }
                Err(DhtError::ConnectionClosed) => break,
                Err(e) => {
                    warn!(error = %e, "transport recv failed");
                    break;
                }
            }
        }
    }

    /// Close the transport and fail every outstanding pending request with
    /// a terminal error.
    pub async fn shutdown(&self) {
        self.transport.close().await;
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            drop(tx);
        }
    }

    async fn on_datagram(&self, bytes: Vec<u8>, source: SocketAddr) {
        let message = match self.codec.decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, from = %source, "dropping malformed datagram");
                return;
            }
        };

        match message.kind {
            MessageType::Request => self.handle_request(message, source).await,
            MessageType::Response | MessageType::Error => self.handle_completion(message).await,
        }
    }

    async fn handle_request(&self, message: Message, source: SocketAddr) {
        let caller = message.origin();

        match self.handlers.get(&message.rpc) {
            Some(handler) => match handler(caller, message.payload.clone()).await {
                Ok(payload) => {
                    let response = Message::response(
                        self.self_id,
                        self.self_address,
                        message.rpc.clone(),
                        message.rpc_id,
                        payload,
                    );
                    self.send_response(response, source).await;
                }
                Err(e) => {
                    debug!(error = %e, rpc = %message.rpc, from = %source, "handler failed; caller will observe a timeout");
                }
            },
            None => {
                warn!(rpc = %message.rpc, from = %source, "no handler registered for rpc");
            }
        }

        self.table.lock().await.update(caller);
    }

    async fn handle_completion(&self, message: Message) {
        let sender = self.pending.lock().await.remove(&message.rpc_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                debug!(rpc_id = %message.rpc_id, "late or unknown response");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::node::Node;
    use crate::routing_table::RoutingTable;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    async fn build_node(port: u16) -> (Arc<Protocol<JsonCodec, crate::transport::UdpTransport>>, Id) {
        let id = Id::random();
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid addr");
        let transport = crate::transport::UdpTransport::bind(addr).await.expect("bind");
        let bound_addr = transport.local_addr().expect("local addr");
        let table = Arc::new(Mutex::new(RoutingTable::new(id, crate::K)));
        let node = Arc::new(Node::new(id, bound_addr, table.clone()));
        let handlers = node.into_handlers();
        let protocol = Arc::new(Protocol::new(
            id,
            bound_addr,
            JsonCodec,
            transport,
            table,
            handlers,
            Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS),
        ));
        (protocol, id)
    }

    /// S4 — RPC round-trip: ping resolves to the remote's id with a
    /// matching rpc_id, and both routing tables learn about each other.
    #[tokio::test]
    async fn test_s4_ping_round_trip() {
        let (p, _p_id) = build_node(0).await;
        let (q, q_id) = build_node(0).await;

        let p_run = tokio::spawn(Arc::clone(&p).run());
        let q_run = tokio::spawn(Arc::clone(&q).run());

        let resolved = p.ping(q.self_address()).await.expect("ping succeeds");
        assert_eq!(resolved, q_id);

        p.shutdown().await;
        q.shutdown().await;
        let _ = p_run.await;
        let _ = q_run.await;
    }

    #[tokio::test]
    async fn test_s5_timeout_has_empty_pending_afterward() {
        let (p, _) = build_node(0).await;
        let unreachable: SocketAddr = "127.0.0.1:1".parse().expect("valid addr");

        let result = p
            .send_request(
                Message::request(p.self_id(), p.self_address(), "find_node", vec![]),
                unreachable,
                Duration::from_millis(50),
            )
            .await;

        assert!(matches!(result, Err(DhtError::RpcTimeout)));
        assert!(p.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_requests() {
        let (p, _) = build_node(0).await;
        let unreachable: SocketAddr = "127.0.0.1:1".parse().expect("valid addr");

        let call = p.send_request(
            Message::request(p.self_id(), p.self_address(), "ping", vec![]),
            unreachable,
            Duration::from_secs(30),
        );

        let shutdown_protocol = Arc::clone(&p);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown_protocol.shutdown().await;
        });

        let result = call.await;
        assert!(matches!(result, Err(DhtError::ConnectionClosed)));
    }
}
