//! Talking to a node from outside the tick loop.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::{
    protocol::{KVDEL, KVGET, KVGET_RESPONSE, KVPUT},
    transport::{Envelope, Inbox, Transport, tcp::TcpTransport},
    tuple,
    value::{Tuple, Value},
};

const CLIENT_CAPACITY: usize = 64;

pub struct KvClient {
    server: String,
    transport: TcpTransport,
    inbox: Inbox,
    next_reqid: i64,
}

impl KvClient {
    /// Binds `listen` for responses. Nothing is sent until the first request.
    pub async fn connect(server: SocketAddr, listen: SocketAddr) -> Result<Self> {
        let (transport, inbox) = TcpTransport::bind(listen, CLIENT_CAPACITY)
            .await
            .with_context(|| format!("failed to bind client address {listen}"))?;
        debug!(server = %server, client = %transport.local_addr(), "client ready");
        Ok(Self {
            server: server.to_string(),
            transport,
            inbox,
            next_reqid: 1,
        })
    }

    pub fn local_addr(&self) -> &str {
        self.transport.local_addr()
    }

    /// Fire and forget; there is no acknowledgement.
    pub fn put(&self, key: impl Into<Value>, value: impl Into<Value>) {
        let (key, value): (Value, Value) = (key.into(), value.into());
        self.send(KVPUT, tuple![self.server.as_str(), key, value]);
    }

    pub fn delete(&self, key: impl Into<Value>) {
        let key: Value = key.into();
        self.send(KVDEL, tuple![self.server.as_str(), key]);
    }

    /// Asks for `key` and waits up to `wait` for the answer. A missing key is
    /// never answered, so it shows up here as `Ok(None)` after the wait.
    pub async fn get(&mut self, key: impl Into<Value>, wait: Duration) -> Result<Option<Value>> {
        let key: Value = key.into();
        let reqid = self.next_reqid;
        self.next_reqid += 1;

        let request = tuple![self.server.as_str(), self.local_addr(), reqid, key.clone()];
        self.send(KVGET, request);

        let deadline = Instant::now() + wait;
        loop {
            let envelope = match timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => anyhow::bail!("client transport closed"),
                Err(_) => return Ok(None),
            };
            if envelope.relation != KVGET_RESPONSE {
                continue;
            }
            if let Some(value) = envelope
                .tuples
                .into_iter()
                .find_map(|t| answer(t, reqid, &key))
            {
                return Ok(Some(value));
            }
        }
    }

    /// Waits for queued requests to be written out, then releases the socket.
    pub async fn close(self) {
        self.transport.close().await;
    }

    fn send(&self, relation: &str, tuple: Tuple) {
        self.transport.send(Envelope {
            from: self.local_addr().to_string(),
            to: self.server.clone(),
            relation: relation.to_string(),
            tuples: vec![tuple],
        });
    }
}

/// Pulls the value out of `[client, reqid, key, value]` if it answers `reqid`.
fn answer(tuple: Tuple, reqid: i64, key: &Value) -> Option<Value> {
    let mut values = tuple.into_values().into_iter();
    let (_client, id, k, value) = (values.next()?, values.next()?, values.next()?, values.next()?);
    (id.as_int() == Some(reqid) && k == *key).then_some(value)
}
