//! The four RPC handlers and local key/value store.
//!
//! `Node` holds exactly the state `spec.md` section 4.6 assigns it: an
//! identity, a shared [`RoutingTable`], and a local store for values this
//! node has been asked to keep. It does not own a [`Protocol`](crate::protocol::Protocol)
//! or issue outbound calls itself — [`crate::lookup`] and
//! [`crate::bootstrap`] do that against a `Protocol` built from
//! [`Node::into_handlers`], keeping the ownership graph acyclic (section 9).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::contact::NodeId;
use crate::id::Id;
use crate::protocol::Handler;
use crate::routing_table::RoutingTable;
use crate::{DhtError, Result, K};

/// Local node state: identity, routing table, and key/value store.
pub struct Node {
    id: Id,
    address: SocketAddr,
    table: Arc<Mutex<RoutingTable>>,
    store: Mutex<HashMap<Id, Value>>,
}

impl Node {
    /// Build a node backed by `table` (shared with its [`Protocol`](crate::protocol::Protocol)).
    pub fn new(id: Id, address: SocketAddr, table: Arc<Mutex<RoutingTable>>) -> Self {
        Self {
            id,
            address,
            table,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// This node's identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// This node's advertised address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The shared routing table backing this node.
    pub fn table(&self) -> Arc<Mutex<RoutingTable>> {
        Arc::clone(&self.table)
    }

    /// Insert a value directly, bypassing RPC. Used by a node storing a
    /// value under its own key during a `store`-mode lookup.
    pub async fn put_local(&self, key: Id, value: Value) {
        self.store.lock().await.insert(key, value);
    }

    /// `ping`: identify self.
    pub async fn handle_ping(&self) -> Result<Vec<Value>> {
        let id_value = serde_json::to_value(self.id).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
        Ok(vec![id_value])
    }

    /// `store(key, value) -> true`.
    pub async fn handle_store(&self, mut args: Vec<Value>) -> Result<Vec<Value>> {
        if args.len() != 2 {
            return Err(DhtError::MessageFormatError(format!(
                "store: expected 2 args, got {}",
                args.len()
            )));
        }
        let value = args.pop().expect("checked len == 2");
        let key_value = args.pop().expect("checked len == 2");
        let key: Id = serde_json::from_value(key_value).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;

        self.store.lock().await.insert(key, value);
        Ok(vec![Value::Bool(true)])
    }

    /// `find_node(key) -> [triple; <= k]`, the `k` closest contacts this
    /// node knows of to `key`, excluding the caller.
    pub async fn handle_find_node(&self, args: Vec<Value>, caller: NodeId) -> Result<Vec<Value>> {
        let key = parse_single_key(args, "find_node")?;
        let triples = self
            .table
            .lock()
            .await
            .k_closest_triples(key, Some(caller), K);
        let triples_value = serde_json::to_value(triples).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
        Ok(vec![triples_value])
    }

    /// `find_value(key) -> (found, data)`: the stored value if present,
    /// else the `k` closest contacts (same shape as `find_node`).
    pub async fn handle_find_value(&self, args: Vec<Value>, caller: NodeId) -> Result<Vec<Value>> {
        let key = parse_single_key(args, "find_value")?;

        if let Some(value) = self.store.lock().await.get(&key).cloned() {
            return Ok(vec![Value::Bool(true), value]);
        }

        let triples = self
            .table
            .lock()
            .await
            .k_closest_triples(key, Some(caller), K);
        let triples_value = serde_json::to_value(triples).map_err(|e| DhtError::MessageFormatError(e.to_string()))?;
        Ok(vec![Value::Bool(false), triples_value])
    }

    /// Build the rpc-name-keyed handler table a [`Protocol`](crate::protocol::Protocol)
    /// dispatches inbound requests through. Explicit registration, not
    /// reflection, per `spec.md` section 9.
    pub fn into_handlers(self: Arc<Self>) -> HashMap<String, Handler> {
        let mut handlers: HashMap<String, Handler> = HashMap::new();

        {
            let node = Arc::clone(&self);
            handlers.insert(
                "ping".to_string(),
                Box::new(move |caller, _args| {
                    let node = Arc::clone(&node);
                    async move {
                        debug!(from = %caller.address, "handling ping");
                        node.handle_ping().await
                    }
                    .boxed()
                }),
            );
        }
        {
            let node = Arc::clone(&self);
            handlers.insert(
                "store".to_string(),
                Box::new(move |caller, args| {
                    let node = Arc::clone(&node);
                    async move {
                        debug!(from = %caller.address, "handling store");
                        node.handle_store(args).await
                    }
                    .boxed()
                }),
            );
        }
        {
            let node = Arc::clone(&self);
            handlers.insert(
                "find_node".to_string(),
                Box::new(move |caller, args| {
                    let node = Arc::clone(&node);
                    async move {
                        debug!(from = %caller.address, "handling find_node");
                        node.handle_find_node(args, caller).await
                    }
                    .boxed()
                }),
            );
        }
        {
            let node = Arc::clone(&self);
            handlers.insert(
                "find_value".to_string(),
                Box::new(move |caller, args| {
                    let node = Arc::clone(&node);
                    async move {
                        debug!(from = %caller.address, "handling find_value");
                        node.handle_find_value(args, caller).await
                    }
                    .boxed()
                }),
            );
        }

        handlers
    }
}

fn parse_single_key(mut args: Vec<Value>, rpc: &str) -> Result<Id> {
    if args.len() != 1 {
        return Err(DhtError::MessageFormatError(format!(
            "{rpc}: expected 1 arg, got {}",
            args.len()
        )));
    }
    let key_value = args.pop().expect("checked len == 1");
    serde_json::from_value(key_value).map_err(|e| DhtError::MessageFormatError(e.to_string()))
}
