//! Running a node on tokio.
//!
//! The loop ticks on a fixed interval and, with `wake_on_arrival`, as soon
//! as an envelope lands in the inbox. Everything else a caller wants from a
//! running node goes through its [`NodeHandle`].

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::NodeConfig,
    error::{ConfigError, SchemaError},
    inspect::TracingInspector,
    node::Node,
    protocol::{self, KVSTATE_REPLICANTS},
    transport::{Transport, tcp::TcpTransport},
    value::Tuple,
};

enum Request {
    Inspect {
        relation: String,
        reply: oneshot::Sender<Result<Vec<Tuple>, SchemaError>>,
    },
}

pub struct NodeHandle {
    local_addr: SocketAddr,
    ticks: Arc<AtomicU64>,
    requests: mpsc::Sender<Request>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ConfigError>>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// The committed contents of `relation` as of the last finished tick.
    pub async fn inspect(&self, relation: &str) -> Result<Vec<Tuple>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Inspect {
                relation: relation.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("node has stopped"))?;
        let tuples = response.await.context("node dropped the request")??;
        Ok(tuples)
    }

    /// Stops the loop after the current tick and waits for it.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("node task panicked")??;
        Ok(())
    }
}

/// Binds the TCP transport, builds the protocol and starts ticking.
pub async fn spawn_node(config: NodeConfig) -> Result<NodeHandle, ConfigError> {
    let (transport, inbox) = TcpTransport::bind(config.listen, config.outbound_capacity).await?;
    let local_addr = transport.socket_addr();
    let topology = config.validate(local_addr)?;

    let program = if topology.is_replicated() {
        protocol::replicated_kv_store()?
    } else {
        protocol::kv_store()?
    };
    for rule in program.describe() {
        debug!(%rule, "compiled rule");
    }
    let mut node = Node::new(program, transport, inbox)
        .with_inspector(TracingInspector::new(config.inspect.iter().cloned()));
    for relation in &config.inspect {
        node.read(relation)?;
    }
    if topology.is_replicated() {
        node.seed(KVSTATE_REPLICANTS, topology.tuples())?;
    }

    let ticks = Arc::new(AtomicU64::new(0));
    let (requests, request_rx) = mpsc::channel(16);
    let (shutdown, shutdown_rx) = oneshot::channel();
    let control = Control {
        config,
        ticks: Arc::clone(&ticks),
        requests: request_rx,
        shutdown: shutdown_rx,
    };

    info!(
        address = %local_addr,
        replicants = topology.replicants().count(),
        "node started"
    );
    let task = tokio::spawn(run(node, control));

    Ok(NodeHandle {
        local_addr,
        ticks,
        requests,
        shutdown,
        task,
    })
}

/// Runs a node until Ctrl-C or a fatal evaluation error.
pub async fn serve(config: NodeConfig) -> Result<()> {
    let mut handle = spawn_node(config).await?;
    info!("node listening on {}", handle.local_addr());

    select! {
        joined = &mut handle.task => {
            joined.context("node task panicked")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        }
    }

    info!("node shutting down");
    handle.shutdown().await
}

struct Control {
    config: NodeConfig,
    ticks: Arc<AtomicU64>,
    requests: mpsc::Receiver<Request>,
    shutdown: oneshot::Receiver<()>,
}

async fn run<T: Transport>(mut node: Node<T>, control: Control) -> Result<(), ConfigError> {
    let Control {
        config,
        ticks,
        mut requests,
        mut shutdown,
    } = control;

    let mut interval = time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut inbox_open = true;

    loop {
        select! {
            _ = &mut shutdown => break,
            Some(request) = requests.recv() => answer(&node, request),
            _ = interval.tick() => step(&mut node, &ticks)?,
            ready = node.inbox_mut().ready(), if config.wake_on_arrival && inbox_open => {
                if ready {
                    step(&mut node, &ticks)?;
                } else {
                    inbox_open = false;
                }
            }
        }
    }

    info!(address = %node.address(), ticks = node.tick_count(), "node stopped");
    Ok(())
}

fn step<T: Transport>(node: &mut Node<T>, ticks: &AtomicU64) -> Result<(), ConfigError> {
    match node.tick() {
        Ok(report) => {
            ticks.store(report.tick, Ordering::Relaxed);
            Ok(())
        }
        Err(err) => {
            error!(address = %node.address(), error = %err, "tick failed, stopping node");
            Err(err)
        }
    }
}

fn answer<T: Transport>(node: &Node<T>, request: Request) {
    match request {
        Request::Inspect { relation, reply } => {
            let _ = reply.send(node.read(&relation).map(|r| r.to_vec()));
        }
    }
}
