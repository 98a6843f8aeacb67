pub mod add;
pub mod current;
pub mod daemon;
pub mod init;
pub mod list;
pub mod migrate;
pub mod remove;
pub mod status;
pub mod update;
pub mod watch;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use roster_core::types::normalize_email;
use roster_core::{config, ChildRecord, ParentId, RosterConfig};
use roster_daemon::open_engine;
use roster_sync::RosterEngine;

/// Identity flags accepted by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct Identity {
    /// Parent id to act as. Defaults to the configured parent.
    #[arg(long, global = true)]
    pub parent: Option<String>,

    /// Parent email used for new children and cross-account consolidation.
    #[arg(long, global = true)]
    pub email: Option<String>,
}

/// Config, resolved identity and an engine over the configured stores.
pub struct Session {
    pub home: PathBuf,
    pub parent: ParentId,
    pub email: Option<String>,
    pub engine: RosterEngine,
}

impl Session {
    pub fn open(identity: &Identity) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config: RosterConfig =
            config::load_at(&home).context("failed to load ~/.roster/config.yaml")?;
        let parent = identity
            .parent
            .clone()
            .map(ParentId::from)
            .or_else(|| config.parent_id.clone())
            .context("no parent configured; run `roster init --parent <id>` first")?;
        let email = identity
            .email
            .as_deref()
            .or(config.parent_email.as_deref())
            .and_then(normalize_email);
        let engine = open_engine(&config);
        Ok(Self {
            home,
            parent,
            email,
            engine,
        })
    }

    /// Drive `future` to completion on a fresh single-threaded runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        Ok(runtime.block_on(future))
    }
}

/// Log to stderr; `ROSTER_LOG` overrides the default `warn` filter.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("ROSTER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Tabled)]
struct ChildRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "age")]
    age: u32,
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "avatar")]
    avatar: String,
}

/// Roster as a table, `*` marking the current child.
pub fn roster_table(roster: &[ChildRecord], current: Option<&ChildRecord>) -> String {
    let rows = roster.iter().map(|child| ChildRow {
        marker: if current.is_some_and(|c| c.id == child.id) {
            "*"
        } else {
            ""
        },
        id: child.id.to_string(),
        name: child.name.clone(),
        age: child.age,
        group: child.age_group.to_string(),
        avatar: child.avatar.clone().unwrap_or_else(|| "-".to_string()),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
