//! `roster remove <id>`

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use roster_core::ChildId;

use super::{Identity, Session};

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Id of the child to delete. Deleted ids never come back.
    pub id: String,
}

impl RemoveArgs {
    pub fn run(self, identity: &Identity) -> Result<()> {
        let session = Session::open(identity)?;
        let id = ChildId::from(self.id);
        let existed = session.block_on(session.engine.delete(&session.parent, &id))?;
        if existed {
            println!("{} Removed {}", "✓".green(), id);
        } else {
            println!(
                "{} No child '{}' here; it will be ignored if it ever appears",
                "!".yellow(),
                id
            );
        }
        Ok(())
    }
}
