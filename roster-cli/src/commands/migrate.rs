//! `roster migrate`

use anyhow::{Context, Result};
use colored::Colorize;

use super::{roster_table, Identity, Session};

pub fn run(identity: &Identity) -> Result<()> {
    let session = Session::open(identity)?;
    let email = session
        .email
        .clone()
        .context("migration needs an email; pass --email or run `roster init --email <e>`")?;

    let roster = session.block_on(
        session
            .engine
            .force_migrate_by_email(&session.parent, &email),
    )?;
    println!(
        "{} {} children now under parent '{}'",
        "✓".green(),
        roster.len(),
        session.parent
    );
    if !roster.is_empty() {
        let current = session.engine.get_current();
        println!("{}", roster_table(&roster, current.as_ref()));
    }
    Ok(())
}
