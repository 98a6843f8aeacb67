//! `roster current [show|set <id>|clear]`

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;

use roster_core::ChildId;

use super::{Identity, Session};

#[derive(Subcommand, Debug)]
pub enum CurrentCommand {
    /// Print the selected child (default).
    Show,
    /// Select a child by id.
    Set { id: String },
    /// Clear the selection.
    Clear,
}

pub fn run(identity: &Identity, command: Option<CurrentCommand>) -> Result<()> {
    let session = Session::open(identity)?;
    match command.unwrap_or(CurrentCommand::Show) {
        CurrentCommand::Show => match session.engine.get_current() {
            Some(child) => println!(
                "{} ({}, age {}, group {})",
                child.name.bold(),
                child.id,
                child.age,
                child.age_group
            ),
            None => println!("No child selected."),
        },
        CurrentCommand::Set { id } => {
            let id = ChildId::from(id);
            let email = session.email.as_deref();
            let mut found = session
                .engine
                .get_roster_sync(&session.parent, email)
                .into_iter()
                .find(|c| c.id == id);
            if found.is_none() {
                found = session
                    .block_on(session.engine.refresh_from_remote(&session.parent, email))?
                    .into_iter()
                    .find(|c| c.id == id);
            }
            let Some(child) = found else {
                bail!("no child '{}' for parent '{}'", id, session.parent);
            };
            session.engine.set_current(&child);
            println!("{} Selected {}", "✓".green(), child.name.bold());
        }
        CurrentCommand::Clear => {
            session.engine.clear_current();
            println!("{} Selection cleared", "✓".green());
        }
    }
    Ok(())
}
