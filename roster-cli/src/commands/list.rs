//! `roster list [--offline] [--json]`

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{print_json, roster_table, Identity, Session};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Use only local data; skip the remote refresh.
    #[arg(long)]
    pub offline: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn run(self, identity: &Identity) -> Result<()> {
        let session = Session::open(identity)?;
        let email = session.email.as_deref();
        let roster = if self.offline {
            session.engine.get_roster_sync(&session.parent, email)
        } else {
            session.block_on(session.engine.refresh_from_remote(&session.parent, email))?
        };

        if self.json {
            return print_json(&roster);
        }
        if roster.is_empty() {
            println!("No children yet. Add one with `roster add <name> --age <n>`.");
            return Ok(());
        }

        let current = session.engine.get_current();
        println!("{}", roster_table(&roster, current.as_ref()));
        let sync = session.engine.status(&session.parent).sync;
        if sync.is_error() {
            println!("{} showing cached roster ({sync})", "!".yellow());
        }
        Ok(())
    }
}
