use clap::{Args, Parser, Subcommand};

use crate::engine::snapshot::{ServerAddress, ServerKind};

#[derive(Parser, Debug)]
#[command(name = "statusync", version, about = "Keep status displays in sync with a game server")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "statusync.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the reconciliation loop and presence sync until interrupted (default)
    Run,

    /// Print every stored display target
    List,

    /// Register a display target, replacing any existing one with the same id
    Add {
        /// Rendering surface id
        id: String,
        #[command(flatten)]
        server: ServerArgs,
        /// Display name shown on the surface
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long)]
        player_avatars: bool,
    },

    /// Stop tracking a display target
    Remove { id: String },

    /// Fetch one snapshot and print it as JSON
    Probe {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    pub host: String,
    #[arg(long, default_value_t = 25565)]
    pub port: u16,
    #[arg(long, default_value_t = ServerKind::Java)]
    pub kind: ServerKind,
}

impl ServerArgs {
    pub fn to_address(&self) -> ServerAddress {
        ServerAddress::new(self.host.clone(), self.port, self.kind)
    }
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
