use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use roster_core::types::normalize_email;
use roster_core::{config, ChildRecord, FileStore, LocalRoster, ParentId, RosterConfig};
use roster_sync::{DirRemote, RosterEngine, Subscription};

use crate::error::{io_err, DaemonError};
use crate::paths::{pid_path, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Engine over the configured local directory and shared remote directory.
pub fn open_engine(config: &RosterConfig) -> RosterEngine {
    let local = LocalRoster::new(Arc::new(FileStore::new(&config.local_dir)));
    let remote = Arc::new(DirRemote::new(&config.remote_dir));
    RosterEngine::new(local, remote)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobKind {
    Refresh,
    Migrate,
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Refresh => "refresh",
            JobKind::Migrate => "migrate",
        }
    }
}

/// Remote work queued from socket clients, processed one at a time.
struct SyncJob {
    kind: JobKind,
    parent: ParentId,
    email: Option<String>,
    respond_to: oneshot::Sender<Vec<ChildRecord>>,
}

/// Everything a socket client handler needs.
#[derive(Clone)]
struct DaemonContext {
    engine: RosterEngine,
    config: RosterConfig,
    jobs: mpsc::Sender<SyncJob>,
    shutdown: broadcast::Sender<()>,
    socket: PathBuf,
    started_at: DateTime<Utc>,
}

impl DaemonContext {
    fn parent_for(&self, request: &DaemonRequest) -> Result<ParentId, String> {
        request
            .parent
            .clone()
            .or_else(|| self.config.parent_id.clone())
            .ok_or_else(|| "no parent given and none configured; run `roster init`".to_string())
    }

    fn email_for(&self, request: &DaemonRequest) -> Option<String> {
        request
            .email
            .as_deref()
            .or(self.config.parent_email.as_deref())
            .and_then(normalize_email)
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let engine = open_engine(&config);
    write_pid_file(&home)?;
    tracing::info!(
        local = %config.local_dir.display(),
        remote = %config.remote_dir.display(),
        "roster daemon starting"
    );

    let (job_tx, job_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let ctx = DaemonContext {
        engine: engine.clone(),
        config: config.clone(),
        jobs: job_tx,
        shutdown: shutdown_tx.clone(),
        socket: socket_path(&home),
        started_at: Utc::now(),
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        let parents = watched_parents(&config);
        let email = config.parent_email.clone();
        tokio::spawn(async move {
            let result = watcher_task(engine, parents, email, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(engine, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    let _ = fs::remove_file(pid_path(&home));
    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("roster daemon stopped");
    Ok(())
}

/// The configured parent plus every `watch_parents` entry, deduplicated.
fn watched_parents(config: &RosterConfig) -> Vec<ParentId> {
    let mut parents: Vec<ParentId> = config.parent_id.iter().cloned().collect();
    for parent in &config.watch_parents {
        if !parents.contains(parent) {
            parents.push(parent.clone());
        }
    }
    parents
}

/// Hold a live subscription per parent until shutdown.
async fn watcher_task(
    engine: RosterEngine,
    parents: Vec<ParentId>,
    email: Option<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let subscriptions: Vec<Subscription> = parents
        .iter()
        .map(|parent| {
            let label = parent.clone();
            engine.subscribe(
                parent,
                Arc::new(move |roster: Vec<ChildRecord>| {
                    tracing::info!(parent = %label, children = roster.len(), "roster updated");
                }),
                email.as_deref(),
            )
        })
        .collect();
    if subscriptions.is_empty() {
        tracing::warn!("no parents configured; live sync is idle until `roster init`");
    } else {
        tracing::info!(parents = subscriptions.len(), "watching rosters");
    }

    let _ = shutdown_rx.recv().await;
    drop(subscriptions);
    Ok(())
}

async fn sync_processor_task(
    engine: RosterEngine,
    mut jobs: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            job = jobs.recv() => {
                let Some(job) = job else { break };
                tracing::debug!(job = job.kind.label(), parent = %job.parent, "processing sync job");
                let roster = match (&job.kind, job.email.as_deref()) {
                    (JobKind::Migrate, Some(email)) => {
                        engine.force_migrate_by_email(&job.parent, email).await
                    }
                    (_, email) => engine.refresh_from_remote(&job.parent, email).await,
                };
                let _ = job.respond_to.send(roster);
            }
        }
    }
    Ok(())
}

async fn enqueue(
    jobs: &mpsc::Sender<SyncJob>,
    kind: JobKind,
    parent: ParentId,
    email: Option<String>,
) -> Result<Vec<ChildRecord>, DaemonError> {
    let (respond_to, response) = oneshot::channel();
    jobs.send(SyncJob {
        kind,
        parent,
        email,
        respond_to,
    })
    .await
    .map_err(|_| DaemonError::ChannelClosed("sync job queue"))?;
    response
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync job response"))
}

async fn socket_server_task(
    ctx: DaemonContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = ctx.socket.clone();
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: DaemonContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&ctx, &request).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn dispatch(ctx: &DaemonContext, request: &DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(ctx)),
        "roster" => match ctx.parent_for(request) {
            Ok(parent) => {
                let email = ctx.email_for(request);
                let children = ctx.engine.get_roster_sync(&parent, email.as_deref());
                DaemonResponse::ok(roster_payload(&parent, &children))
            }
            Err(message) => DaemonResponse::error(message),
        },
        "refresh" | "migrate" => {
            let parent = match ctx.parent_for(request) {
                Ok(parent) => parent,
                Err(message) => return DaemonResponse::error(message),
            };
            let email = ctx.email_for(request);
            let kind = if request.cmd == "migrate" {
                if email.is_none() {
                    return DaemonResponse::error("migrate needs an email; pass one or run `roster init --email`");
                }
                JobKind::Migrate
            } else {
                JobKind::Refresh
            };
            match enqueue(&ctx.jobs, kind, parent.clone(), email).await {
                Ok(children) => DaemonResponse::ok(roster_payload(&parent, &children)),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "stop" => {
            let _ = ctx.shutdown.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

fn roster_payload(parent: &ParentId, children: &[ChildRecord]) -> Value {
    json!({
        "parent": parent,
        "children": children,
    })
}

fn build_status_payload(ctx: &DaemonContext) -> Value {
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at": ctx.started_at.to_rfc3339(),
        "socket": ctx.socket.display().to_string(),
        "parent": ctx.config.parent_id,
        "current": ctx.engine.get_current().map(|c| c.id),
        "tombstones": ctx.engine.tombstones().len(),
        "parents": ctx.engine.statuses(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

fn write_pid_file(home: &Path) -> Result<(), DaemonError> {
    let path = pid_path(home);
    fs::write(&path, std::process::id().to_string()).map_err(|e| io_err(&path, e))
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// `RUST_LOG` filters (default `info`); `ROSTER_LOG_FORMAT=json` switches to
/// one JSON object per line.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ROSTER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
