use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{config::NodeConfig, transport::tcp::DEFAULT_CAPACITY};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a key-value node.
    Serve(ServeArgs),
    /// Store a value under a key.
    Put(PutArgs),
    /// Fetch the value stored under a key.
    Get(GetArgs),
    /// Remove a key.
    Delete(DeleteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the node binds to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:7000")]
    pub listen: SocketAddr,

    /// Address of a replicant that receives this node's state; repeatable.
    #[arg(long = "replicant")]
    pub replicants: Vec<String>,

    /// Milliseconds between ticks.
    #[arg(long, default_value_t = 100)]
    pub tick_ms: u64,

    /// Also tick as soon as a message arrives.
    #[arg(long)]
    pub wake_on_arrival: bool,

    /// Outbound envelopes buffered before sends are dropped.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub outbound_capacity: usize,

    /// Relation to log whenever it changes; repeatable.
    #[arg(long = "inspect", default_value = "kvstate")]
    pub inspect: Vec<String>,
}

impl From<ServeArgs> for NodeConfig {
    fn from(args: ServeArgs) -> Self {
        NodeConfig {
            listen: args.listen,
            replicants: args.replicants,
            tick_interval: Duration::from_millis(args.tick_ms),
            wake_on_arrival: args.wake_on_arrival,
            outbound_capacity: args.outbound_capacity,
            inspect: args.inspect,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the node to talk to.
    #[arg(long, default_value = "127.0.0.1:7000")]
    pub server: SocketAddr,

    /// Address this client listens on for responses.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct PutArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    pub key: String,
    pub value: String,
}

#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    pub key: String,

    /// Milliseconds to wait for an answer before reporting the key as missing.
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub client: ClientArgs,
    pub key: String,
}
