//! TCP transport.
//!
//! A listener task feeds every envelope it reads into the [`Inbox`].
//! Outbound envelopes go through a bounded queue to a dispatcher that keeps
//! one bounded lane per destination. Each lane delivers in order, one
//! connection per envelope, under a deadline. Failures are logged and cost
//! only the tuples in that envelope.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, warn};

use super::{Envelope, Inbox, Transport};
use crate::{
    error::{ConfigError, TransportError},
    wire::{MAX_FRAME, read_envelope, write_envelope},
};

pub const DEFAULT_CAPACITY: usize = 1024;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Deadline for one whole delivery: connect plus write.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Inbound connections and outbound lanes idle for this long are closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    socket: SocketAddr,
    outbound: Option<mpsc::Sender<Envelope>>,
    listener_task: JoinHandle<()>,
    sender_task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Binds `listen` and starts the listener and sender tasks. Port 0 picks
    /// an ephemeral port; [`Transport::local_addr`] reports the real one.
    pub async fn bind(listen: SocketAddr, capacity: usize) -> Result<(Self, Inbox), ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidSetting(
                "outbound capacity must be at least 1".to_string(),
            ));
        }

        let bind_error = |source| ConfigError::Bind {
            address: listen.to_string(),
            source,
        };
        let listener = TcpListener::bind(listen).await.map_err(bind_error)?;
        let socket = listener.local_addr().map_err(bind_error)?;

        let (inbound, inbox) = Inbox::channel();
        let (outbound, queue) = mpsc::channel(capacity);

        let transport = TcpTransport {
            address: socket.to_string(),
            socket,
            outbound: Some(outbound),
            listener_task: tokio::spawn(accept_loop(listener, inbound)),
            sender_task: Some(tokio::spawn(send_loop(queue, capacity))),
        };
        Ok((transport, inbox))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket
    }

    /// Stops accepting new sends and waits until everything already queued
    /// has been attempted.
    pub async fn close(mut self) {
        self.outbound.take();
        if let Some(task) = self.sender_task.take() {
            if let Err(err) = task.await {
                debug!(error = ?err, "sender task ended abnormally");
            }
        }
    }
}

impl Transport for TcpTransport {
    fn local_addr(&self) -> &str {
        &self.address
    }

    fn send(&self, envelope: Envelope) {
        let Some(outbound) = &self.outbound else {
            debug!(peer = %envelope.to, error = %TransportError::Closed, "dropping envelope");
            return;
        };
        match outbound.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                warn!(
                    peer = %envelope.to,
                    relation = %envelope.relation,
                    error = %TransportError::QueueFull,
                    "dropping envelope"
                );
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                debug!(peer = %envelope.to, error = %TransportError::Closed, "dropping envelope");
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.listener_task.abort();
        if let Some(task) = &self.sender_task {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, inbound: mpsc::UnboundedSender<Envelope>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Err(err) = receive(stream, &inbound).await {
                        debug!(%peer, error = %err, "inbound connection closed with error");
                    }
                });
            }
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
        if inbound.is_closed() {
            break;
        }
    }
}

async fn receive(
    stream: TcpStream,
    inbound: &mpsc::UnboundedSender<Envelope>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    loop {
        let next = timeout(IDLE_TIMEOUT, read_envelope(&mut reader, MAX_FRAME))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "peer went idle"))?;
        let Some(envelope) = next? else {
            return Ok(());
        };
        if inbound.send(envelope).is_err() {
            return Ok(());
        }
    }
}

/// Routes queued envelopes to one sender task per destination, so a slow
/// peer only holds up its own envelopes while each peer still sees its
/// envelopes in order. Returns once the queue is closed and every lane has
/// drained.
async fn send_loop(mut queue: mpsc::Receiver<Envelope>, capacity: usize) {
    let mut lanes: HashMap<String, mpsc::Sender<Envelope>> = HashMap::new();
    let mut workers = JoinSet::new();

    while let Some(envelope) = queue.recv().await {
        let envelope = match lanes.get(&envelope.to) {
            None => envelope,
            Some(lane) => match lane.try_send(envelope) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(envelope)) => {
                    warn!(
                        peer = %envelope.to,
                        relation = %envelope.relation,
                        error = %TransportError::QueueFull,
                        "dropping envelope"
                    );
                    continue;
                }
                // The lane went idle and shut down; open a fresh one.
                Err(mpsc::error::TrySendError::Closed(envelope)) => envelope,
            },
        };

        lanes.retain(|_, lane| !lane.is_closed());
        while workers.try_join_next().is_some() {}

        let peer = envelope.to.clone();
        let (lane, pending) = mpsc::channel(capacity);
        workers.spawn(peer_loop(peer.clone(), pending));
        if lane.try_send(envelope).is_ok() {
            lanes.insert(peer, lane);
        }
    }

    drop(lanes);
    while workers.join_next().await.is_some() {}
}

async fn peer_loop(peer: String, mut pending: mpsc::Receiver<Envelope>) {
    loop {
        match timeout(IDLE_TIMEOUT, pending.recv()).await {
            Ok(Some(envelope)) => attempt(envelope).await,
            Ok(None) => return,
            Err(_) => {
                pending.close();
                while let Ok(envelope) = pending.try_recv() {
                    attempt(envelope).await;
                }
                debug!(%peer, "closing idle sender lane");
                return;
            }
        }
    }
}

async fn attempt(envelope: Envelope) {
    if let Err(err) = deliver(&envelope).await {
        warn!(
            peer = %envelope.to,
            relation = %envelope.relation,
            tuples = envelope.tuples.len(),
            error = %err,
            "dropping envelope"
        );
    }
}

async fn deliver(envelope: &Envelope) -> Result<(), TransportError> {
    timeout(SEND_TIMEOUT, connect_and_write(envelope))
        .await
        .map_err(|_| TransportError::Timeout {
            peer: envelope.to.clone(),
        })?
}

async fn connect_and_write(envelope: &Envelope) -> Result<(), TransportError> {
    let peer = envelope.to.as_str();
    let io_error = |source| TransportError::Io {
        peer: peer.to_string(),
        source,
    };

    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(peer))
        .await
        .map_err(|_| TransportError::Timeout {
            peer: peer.to_string(),
        })?
        .map_err(io_error)?;
    write_envelope(&mut stream, envelope).await.map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn delivers_between_sockets() {
        let (a, _a_inbox) = TcpTransport::bind(local(), 8).await.expect("bind a");
        let (b, mut b_inbox) = TcpTransport::bind(local(), 8).await.expect("bind b");

        let envelope = Envelope {
            from: a.local_addr().to_string(),
            to: b.local_addr().to_string(),
            relation: "kvput".into(),
            tuples: vec![tuple![b.local_addr(), "k", "v"]],
        };
        a.send(envelope.clone());

        let received = timeout(Duration::from_secs(3), b_inbox.recv())
            .await
            .expect("envelope in time")
            .expect("inbox open");
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let err = TcpTransport::bind(local(), 0).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting(_)));
    }

    #[tokio::test]
    async fn unreachable_peer_is_not_an_error() {
        let (a, _inbox) = TcpTransport::bind(local(), 8).await.expect("bind");
        let unused = TcpListener::bind(local()).await.expect("bind unused");
        let dead = unused.local_addr().expect("addr").to_string();
        drop(unused);

        a.send(Envelope {
            from: a.local_addr().to_string(),
            to: dead,
            relation: "kvput".into(),
            tuples: Vec::new(),
        });
        a.close().await;
    }

    #[tokio::test]
    async fn stalled_peer_does_not_hold_up_others() {
        let (a, _a_inbox) = TcpTransport::bind(local(), 8).await.expect("bind a");
        let (b, mut b_inbox) = TcpTransport::bind(local(), 8).await.expect("bind b");

        // Accepts into the backlog but never reads, so a large write stalls.
        let stalled = TcpListener::bind(local()).await.expect("bind stalled");
        let stalled_addr = stalled.local_addr().expect("addr").to_string();

        a.send(Envelope {
            from: a.local_addr().to_string(),
            to: stalled_addr.clone(),
            relation: "kvput".into(),
            tuples: (0..200_000)
                .map(|i| tuple![stalled_addr.as_str(), format!("key-{i}"), "x".repeat(32)])
                .collect(),
        });
        let answer = Envelope {
            from: a.local_addr().to_string(),
            to: b.local_addr().to_string(),
            relation: "kvget_response".into(),
            tuples: vec![tuple![b.local_addr(), 1, "k", "v"]],
        };
        a.send(answer.clone());

        let received = timeout(Duration::from_secs(3), b_inbox.recv())
            .await
            .expect("healthy peer served while another stalls")
            .expect("inbox open");
        assert_eq!(received, answer);
        drop(stalled);
    }
}
