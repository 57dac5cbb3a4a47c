use clap::{Parser, Subcommand};

/// eventsheet — event data layer over a Google spreadsheet
#[derive(Parser)]
#[command(name = "eventsheet", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to EVENTSHEET_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep rows in process memory instead of the spreadsheet
        #[arg(long)]
        in_memory: bool,
    },

    /// Check that the spreadsheet is reachable with the configured credentials
    Health,
}
