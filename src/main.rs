use anyhow::Result;
use clap::Parser;

mod cli;

use spyglass::{config::load_config, init_tracing, server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    init_tracing();

    match args.get_command() {
        cli::Commands::Start { port, demo } => {
            let mut config = load_config()?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if demo {
                config.demo.enabled = true;
            }
            server::start_server(config).await?;
        }
        cli::Commands::Version => {
            println!("spyglass v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
