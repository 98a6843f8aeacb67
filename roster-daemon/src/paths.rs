use std::path::{Path, PathBuf};

use roster_core::config::roster_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DAEMON_PID: &str = "daemon.pid";

pub fn run_dir(home: &Path) -> PathBuf {
    roster_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    roster_root(home).join(DAEMON_SOCKET)
}

pub fn pid_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_PID)
}
