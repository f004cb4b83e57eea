use crate::command;
use crate::config::SharedConfig;
use crate::connection::{ClientState, ShutdownMode};
use crate::persistence::{self, rdb, SharedCoordinator};
use crate::pubsub::{PushReceiver, SharedPubSub};
use crate::resp::{RespParser, RespValue};
use crate::store::SharedKeyspace;
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Grace window for the final snapshot during shutdown.
const SHUTDOWN_SAVE_GRACE: Duration = Duration::from_secs(10);

/// Counters surfaced through INFO.
pub struct ServerStats {
    start: Instant,
    pub connections_received: AtomicU64,
    pub commands_processed: AtomicU64,
    pub connected_clients: AtomicUsize,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        ServerStats {
            start: Instant::now(),
            connections_received: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            connected_clients: AtomicUsize::new(0),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

pub async fn run_server(
    store: SharedKeyspace,
    config: SharedConfig,
    pubsub: SharedPubSub,
    coord: SharedCoordinator,
) -> std::io::Result<()> {
    let stats = Arc::new(ServerStats::new());

    let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("cannot resolve {}", config.host),
            )
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(config.backlog)?;
    info!("cinnabar listening on {addr}");

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<ShutdownMode>(1);

    // Background timers: expiration sweep, AOF fsync, snapshot
    // auto-save, AOF rewrite eligibility.
    let timers = vec![
        tokio::spawn(sweep_loop(store.clone(), coord.clone())),
        tokio::spawn(aof_fsync_loop(coord.clone())),
        tokio::spawn(auto_save_loop(store.clone(), coord.clone(), config.clone())),
        tokio::spawn(aof_rewrite_loop(store.clone(), coord.clone(), config.clone())),
    ];

    let shutdown_mode = loop {
        tokio::select! {
            result = listener.accept() => {
                let (mut stream, peer_addr) = result?;

                if stats.connected_clients.load(Ordering::Relaxed) >= config.max_connections {
                    let reply = RespValue::error("ERR max number of clients reached");
                    let _ = stream.write_all(&reply.serialize()).await;
                    continue;
                }

                stats.connections_received.fetch_add(1, Ordering::Relaxed);
                stats.connected_clients.fetch_add(1, Ordering::Relaxed);
                debug!("new connection from {peer_addr}");

                let store = store.clone();
                let config = config.clone();
                let pubsub = pubsub.clone();
                let coord = coord.clone();
                let stats = stats.clone();
                let shutdown_tx = shutdown_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) =
                        handle_connection(stream, store, config, pubsub, coord, stats.clone(), shutdown_tx)
                            .await
                    {
                        debug!("connection error from {peer_addr}: {e}");
                    }
                    stats.connected_clients.fetch_sub(1, Ordering::Relaxed);
                    debug!("connection closed: {peer_addr}");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                break ShutdownMode::Default;
            }
            Some(mode) = shutdown_rx.recv() => {
                break mode;
            }
        }
    };

    info!("shutting down");
    drop(listener);
    for timer in &timers {
        timer.abort();
    }

    let save_wanted = match shutdown_mode {
        ShutdownMode::NoSave => false,
        ShutdownMode::Save => true,
        ShutdownMode::Default => config.rdb_enabled,
    };
    if save_wanted {
        let snapshot = store.read().await.clone();
        let path = config.rdb_path();
        let save = tokio::task::spawn_blocking(move || rdb::save(&snapshot, &path));
        match tokio::time::timeout(SHUTDOWN_SAVE_GRACE, save).await {
            Ok(Ok(Ok(()))) => info!("final snapshot written"),
            Ok(Ok(Err(e))) => warn!("final snapshot failed: {e}"),
            Ok(Err(e)) => warn!("final snapshot task failed: {e}"),
            Err(_) => warn!("final snapshot timed out"),
        }
    }

    let mut co = coord.lock().await;
    let _ = co.aof.sync();
    co.aof.close();

    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    store: SharedKeyspace,
    config: SharedConfig,
    pubsub: SharedPubSub,
    coord: SharedCoordinator,
    stats: Arc<ServerStats>,
    shutdown_tx: mpsc::Sender<ShutdownMode>,
) -> std::io::Result<()> {
    let (push_tx, mut push_rx): (_, PushReceiver) = mpsc::unbounded_channel();
    let mut client = ClientState::new(push_tx);
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        // Drain every complete frame already buffered before reading more.
        loop {
            match RespParser::parse(&mut buf) {
                Ok(Some(value)) => {
                    let items = match value {
                        RespValue::Array(Some(items)) => items,
                        _ => {
                            let reply = RespValue::error("ERR invalid command format");
                            stream.write_all(&reply.serialize()).await?;
                            continue;
                        }
                    };
                    // Bare CRLF from an inline client; ignore it.
                    if items.is_empty() {
                        continue;
                    }

                    let cmd_name = match items[0].to_string_lossy() {
                        Some(name) => name.to_uppercase(),
                        None => {
                            let reply = RespValue::error("ERR invalid command name");
                            stream.write_all(&reply.serialize()).await?;
                            continue;
                        }
                    };

                    let reply = command::dispatch(
                        &cmd_name,
                        &items[1..],
                        &store,
                        &pubsub,
                        &coord,
                        &config,
                        &stats,
                        &mut client,
                    )
                    .await;

                    stream.write_all(&reply.serialize()).await?;

                    // SHUTDOWN's reply must reach the client before the
                    // server starts tearing down.
                    if let Some(mode) = client.shutdown_requested.take() {
                        let _ = shutdown_tx.send(mode).await;
                    }

                    if client.should_close {
                        cleanup_client(&pubsub, &client).await;
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Closing avoids frame desynchronization after a
                    // protocol error.
                    let reply = RespValue::error(format!("ERR Protocol error: {e}"));
                    stream.write_all(&reply.serialize()).await?;
                    cleanup_client(&pubsub, &client).await;
                    return Ok(());
                }
            }
        }

        tokio::select! {
            result = stream.read_buf(&mut buf) => {
                match result {
                    Ok(0) => {
                        cleanup_client(&pubsub, &client).await;
                        return Ok(());
                    }
                    Ok(_) => {} // got data; loop back to the parser
                    Err(e) => {
                        cleanup_client(&pubsub, &client).await;
                        return Err(e);
                    }
                }
            }
            Some(msg) = push_rx.recv() => {
                stream.write_all(&msg.serialize()).await?;
            }
        }
    }
}

async fn cleanup_client(pubsub: &SharedPubSub, client: &ClientState) {
    let mut bus = pubsub.write().await;
    bus.unsubscribe_all(client.id);
}

/// Once per second: delete entries past their deadline and log a
/// synthetic DEL for each so the append-only log tracks the deletions.
async fn sweep_loop(store: SharedKeyspace, coord: SharedCoordinator) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut ks = store.write().await;
        let removed = ks.sweep_expired();
        if removed.is_empty() {
            continue;
        }

        ks.dirty += removed.len() as u64;
        let mut co = coord.lock().await;
        for key in &removed {
            co.log_write("DEL", &[RespValue::bulk_string(key.clone())]);
        }
        debug!("expiration sweep removed {} keys", removed.len());
    }
}

/// Once per second: push the append-only file to disk under the
/// `everysec` policy.
async fn aof_fsync_loop(coord: SharedCoordinator) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut co = coord.lock().await;
        if co.aof.fsync_policy() == crate::persistence::aof::FsyncPolicy::Everysec {
            if let Err(e) = co.aof.sync() {
                warn!("append-only file fsync failed: {e}");
            }
        }
    }
}

/// Once per second: when both auto-save thresholds are exceeded and no
/// save is in flight, clone the keyspace and write it in the background.
async fn auto_save_loop(store: SharedKeyspace, coord: SharedCoordinator, config: SharedConfig) {
    if !config.rdb_enabled {
        return;
    }
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = {
            let ks = store.read().await;
            let mut co = coord.lock().await;
            let elapsed = crate::store::entry::now_seconds().saturating_sub(co.last_save_secs);
            if co.bgsave_in_progress
                || ks.dirty < config.rdb_min_changes
                || elapsed < config.rdb_save_seconds
            {
                continue;
            }
            co.bgsave_in_progress = true;
            ks.clone()
        };

        info!(
            "auto-save triggered ({} changes since last save)",
            snapshot.dirty
        );
        persistence::spawn_background_save(
            store.clone(),
            coord.clone(),
            config.rdb_path(),
            snapshot,
        );
    }
}

/// Periodically rewrite the append-only log from the live state once it
/// grows past the configured size. Only one rewrite runs at a time.
async fn aof_rewrite_loop(store: SharedKeyspace, coord: SharedCoordinator, config: SharedConfig) {
    if !config.aof_enabled {
        return;
    }
    let interval = Duration::from_secs(config.aof_rewrite_seconds.max(1));
    loop {
        tokio::time::sleep(interval).await;

        let ks = store.read().await;
        let mut co = coord.lock().await;
        if co.aof_rewrite_in_progress
            || !co.aof.is_active()
            || co.aof.size() < config.aof_rewrite_min_bytes
        {
            continue;
        }

        co.aof_rewrite_in_progress = true;
        let path = config.aof_path();
        info!("rewriting append-only file ({} bytes)", co.aof.size());
        match crate::persistence::aof::rewrite(&ks, &path) {
            Ok(()) => {
                // The live handle still points at the replaced inode.
                if let Err(e) = co.aof.reopen() {
                    warn!("failed to reopen append-only file after rewrite: {e}");
                }
            }
            Err(e) => warn!("append-only file rewrite failed: {e}"),
        }
        co.aof_rewrite_in_progress = false;
    }
}
