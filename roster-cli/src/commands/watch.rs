//! `roster watch`: print the roster whenever it changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use roster_core::ChildRecord;

use super::{roster_table, Identity, Session};

pub fn run(identity: &Identity) -> Result<()> {
    let session = Session::open(identity)?;
    println!(
        "Watching parent '{}' (ctrl-c to stop)",
        session.parent.to_string().bold()
    );

    let engine = session.engine.clone();
    let printer = engine.clone();
    let callback = Arc::new(move |roster: Vec<ChildRecord>| {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        println!("{} {} children", stamp.to_string().dimmed(), roster.len());
        if !roster.is_empty() {
            println!("{}", roster_table(&roster, printer.get_current().as_ref()));
        }
    });

    session
        .block_on(async {
            let _subscription = engine.subscribe(&session.parent, callback, session.email.as_deref());
            tokio::signal::ctrl_c().await
        })?
        .context("failed to listen for ctrl-c")?;
    Ok(())
}
