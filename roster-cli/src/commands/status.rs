//! `roster status [--json]`: sync visibility for the active parent.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use roster_daemon::{send_request, DaemonError, DaemonRequest};
use roster_sync::{ParentStatus, SyncState};

use super::{print_json, Identity, Session};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusReport {
    parent: String,
    email: Option<String>,
    children: usize,
    current: Option<String>,
    tombstones: usize,
    sync: ParentStatus,
    daemon_running: bool,
}

impl StatusArgs {
    pub fn run(self, identity: &Identity) -> Result<()> {
        let session = Session::open(identity)?;
        let roster = session.block_on(
            session
                .engine
                .refresh_from_remote(&session.parent, session.email.as_deref()),
        )?;

        let report = StatusReport {
            parent: session.parent.to_string(),
            email: session.email.clone(),
            children: roster.len(),
            current: session.engine.get_current().map(|c| c.name),
            tombstones: session.engine.tombstones().len(),
            sync: session.engine.status(&session.parent),
            daemon_running: daemon_running(&session)?,
        };

        if self.json {
            return print_json(&report);
        }
        print_report(&report);
        Ok(())
    }
}

fn daemon_running(session: &Session) -> Result<bool> {
    match send_request(&session.home, &DaemonRequest::new("status")) {
        Ok(response) => Ok(response.ok),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn print_report(report: &StatusReport) {
    let sync = match &report.sync.sync {
        SyncState::Idle => "in sync".green(),
        SyncState::Syncing => "syncing".yellow(),
        SyncState::Error { message } => format!("error: {message}").red(),
    };
    println!("Parent:     {}", report.parent.bold());
    println!(
        "Email:      {}",
        report.email.as_deref().unwrap_or("(none)")
    );
    println!("Children:   {}", report.children);
    println!(
        "Current:    {}",
        report.current.as_deref().unwrap_or("(none)")
    );
    println!("Deleted:    {}", report.tombstones);
    println!("Remote:     {sync}");
    println!(
        "Last sync:  {}",
        format_age(report.sync.last_synced_at, Utc::now())
    );
    println!(
        "Daemon:     {}",
        if report.daemon_running {
            "running".green()
        } else {
            "not running".dimmed()
        }
    );
}

fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
