//! `roster update <id> [--name <n>] [--age <n>] [--avatar <a>]`

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use roster_core::{ChildId, ChildPatch};

use super::{Identity, Session};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Id of the child to change.
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub age: Option<u32>,

    /// Avatar reference; pass an empty string to clear it.
    #[arg(long)]
    pub avatar: Option<String>,
}

impl UpdateArgs {
    pub fn run(self, identity: &Identity) -> Result<()> {
        let patch = ChildPatch {
            name: self.name,
            age: self.age,
            avatar: self
                .avatar
                .map(|a| Some(a.trim().to_string()).filter(|a| !a.is_empty())),
            parent_email: None,
        };
        if patch.is_empty() {
            bail!("nothing to update; pass --name, --age or --avatar");
        }

        let session = Session::open(identity)?;
        let id = ChildId::from(self.id);
        let updated = session.block_on(session.engine.update(&session.parent, &id, &patch))?;
        match updated {
            Some(child) => {
                println!(
                    "{} Updated {} (age {}, group {})",
                    "✓".green(),
                    child.name.bold(),
                    child.age,
                    child.age_group
                );
                Ok(())
            }
            None => bail!("no child '{}' for parent '{}'", id, session.parent),
        }
    }
}
