//! `roster init --parent <id> [--email <e>] [--local-dir <p>] [--remote-dir <p>]`

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use roster_core::types::normalize_email;
use roster_core::{config, ParentId};

use super::Identity;

/// Set the parent identity and storage locations.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory for this device's local store.
    #[arg(long, value_name = "DIR")]
    pub local_dir: Option<PathBuf>,

    /// Shared directory used as the remote store (e.g. a synced folder).
    #[arg(long, value_name = "DIR")]
    pub remote_dir: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self, identity: &Identity) -> Result<()> {
        let Some(parent) = identity.parent.clone().map(ParentId::from) else {
            bail!("`roster init` needs --parent <id>");
        };
        let home = dirs::home_dir().context("could not determine home directory")?;
        let mut cfg = config::load_at(&home).context("failed to load ~/.roster/config.yaml")?;

        cfg.parent_id = Some(parent.clone());
        if let Some(email) = identity.email.as_deref() {
            cfg.parent_email = normalize_email(email);
        }
        if let Some(dir) = self.local_dir {
            cfg.local_dir = dir;
        }
        if let Some(dir) = self.remote_dir {
            cfg.remote_dir = dir;
        }
        if !cfg.watch_parents.contains(&parent) {
            cfg.watch_parents.push(parent.clone());
        }

        for dir in [&cfg.local_dir, &cfg.remote_dir] {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        config::save_at(&home, &cfg).context("failed to save ~/.roster/config.yaml")?;

        println!("{} Roster initialised for parent '{}'", "✓".green(), parent);
        if let Some(email) = &cfg.parent_email {
            println!("  Email:  {email}");
        }
        println!("  Local:  {}", cfg.local_dir.display());
        println!("  Remote: {}", cfg.remote_dir.display());
        Ok(())
    }
}
