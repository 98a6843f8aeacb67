//! Roster: local-first child roster CLI.
//!
//! # Usage
//!
//! ```text
//! roster init --parent <id> [--email <e>]
//! roster add <name> --age <n>
//! roster list [--offline] [--json]
//! roster update <id> [--name <n>] [--age <n>] [--avatar <a>]
//! roster remove <id>
//! roster migrate
//! roster current [show|set <id>|clear]
//! roster status [--json]
//! roster watch
//! roster daemon start|stop|status
//! ```
//!
//! `--parent` and `--email` override the configured identity for any command.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    add::AddArgs, current::CurrentCommand, daemon::DaemonCommand, init::InitArgs, list::ListArgs,
    remove::RemoveArgs, status::StatusArgs, update::UpdateArgs, Identity,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "roster",
    version,
    about = "Keep a parent's child roster in sync across devices",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    identity: Identity,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set the parent identity and create the storage directories.
    Init(InitArgs),

    /// Add a child to the roster and select it.
    Add(AddArgs),

    /// Show the roster.
    List(ListArgs),

    /// Change a child's name, age or avatar.
    Update(UpdateArgs),

    /// Delete a child permanently.
    Remove(RemoveArgs),

    /// Pull every child recorded under the configured email onto this parent.
    Migrate,

    /// Show or change the selected child.
    Current {
        #[command(subcommand)]
        command: Option<CurrentCommand>,
    },

    /// Show sync state for the parent.
    Status(StatusArgs),

    /// Print the roster on every change until interrupted.
    Watch,

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        commands::init_tracing();
    }
    let identity = cli.identity;
    match cli.command {
        Commands::Init(args) => args.run(&identity),
        Commands::Add(args) => args.run(&identity),
        Commands::List(args) => args.run(&identity),
        Commands::Update(args) => args.run(&identity),
        Commands::Remove(args) => args.run(&identity),
        Commands::Migrate => commands::migrate::run(&identity),
        Commands::Current { command } => commands::current::run(&identity, command),
        Commands::Status(args) => args.run(&identity),
        Commands::Watch => commands::watch::run(&identity),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
