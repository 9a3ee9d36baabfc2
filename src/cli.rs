use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "reelbox")]
#[command(about = "Chat bot that turns video links into download links", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $REELBOX_CONFIG or config/reelbox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bot, the retrieval API and the staging sweeper
    Run,
    /// Resolve one URL with the configured strategies and print its shortlist
    Probe(ProbeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ProbeArgs {
    /// Media page URL
    pub url: String,
}
