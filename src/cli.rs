use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "spyglass", version, about = "Single-binary telemetry collector")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the collector server (default)
    Start {
        /// Port to listen on (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable demo data generation
        #[arg(long)]
        demo: bool,
    },

    /// Show version information
    Version,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start {
            port: None,
            demo: false,
        })
    }
}
