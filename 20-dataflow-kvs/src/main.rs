use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use dataflow_kvs::{
    cli::{Cli, ClientArgs, Command},
    client::KvClient,
    config::NodeConfig,
    runtime,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn connect(args: &ClientArgs) -> Result<KvClient> {
    KvClient::connect(args.server, args.listen).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            if let Err(err) = runtime::serve(NodeConfig::from(args)).await {
                warn!("node exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Put(args) => {
            let client = connect(&args.client).await?;
            client.put(args.key, args.value);
            client.close().await;
        }
        Command::Delete(args) => {
            let client = connect(&args.client).await?;
            client.delete(args.key);
            client.close().await;
        }
        Command::Get(args) => {
            let mut client = connect(&args.client).await?;
            let wait = Duration::from_millis(args.timeout_ms);
            match client.get(args.key.as_str(), wait).await? {
                Some(value) => println!("{value}"),
                None => println!("(no value)"),
            }
            client.close().await;
        }
    }

    Ok(())
}
