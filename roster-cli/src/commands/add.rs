//! `roster add <name> --age <n>`

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use super::{Identity, Session};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Child's display name.
    pub name: String,

    /// Age in years; decides the age group.
    #[arg(long)]
    pub age: u32,
}

impl AddArgs {
    pub fn run(self, identity: &Identity) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            bail!("child name must not be empty");
        }
        let session = Session::open(identity)?;
        let child = session.block_on(session.engine.add(
            &session.parent,
            name,
            self.age,
            session.email.as_deref(),
        ))?;

        println!(
            "{} Added {} ({}, age {}, group {})",
            "✓".green(),
            child.name.bold(),
            child.id,
            child.age,
            child.age_group
        );
        Ok(())
    }
}
