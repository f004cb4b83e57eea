pub mod aof;
pub mod rdb;

use crate::config::Config;
use crate::error::{CinnabarError, CinnabarResult};
use crate::resp::RespValue;
use crate::store::entry::now_seconds;
use crate::store::{Keyspace, SharedKeyspace};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Persistence coordinator: owns the append-only file writer and the
/// bookkeeping that drives snapshots, background saves and log
/// rewrites. Shared behind a mutex; the dispatcher holds it for the
/// span of each command.
pub struct Coordinator {
    pub aof: aof::AofWriter,
    /// Unix time of the last successful snapshot.
    pub last_save_secs: u64,
    pub bgsave_in_progress: bool,
    pub last_bgsave_status: String,
    pub aof_rewrite_in_progress: bool,
    pub last_aof_write_status: String,
    /// A point-in-time clone staged by BGSAVE, picked up by the
    /// dispatcher once the locks are released.
    pub pending_bgsave: Option<Keyspace>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator {
            aof: aof::AofWriter::new(),
            last_save_secs: now_seconds(),
            bgsave_in_progress: false,
            last_bgsave_status: "ok".to_string(),
            aof_rewrite_in_progress: false,
            last_aof_write_status: "ok".to_string(),
            pending_bgsave: None,
        }
    }

    /// Append a write command to the log. Failures widen the data-loss
    /// window but never take the server down; the status is surfaced
    /// through INFO.
    pub fn log_write(&mut self, cmd_name: &str, args: &[RespValue]) {
        if !self.aof.is_active() {
            return;
        }
        if let Err(e) = self.aof.append(cmd_name, args) {
            warn!("append-only file write failed: {e}");
            self.last_aof_write_status = format!("err: {e}");
        }
    }
}

pub type SharedCoordinator = Arc<Mutex<Coordinator>>;

/// Rebuild the keyspace at startup: replay the append-only file when it
/// is enabled and present, otherwise load the snapshot if one exists.
/// Corruption in either aborts startup.
pub fn recover(config: &Config) -> CinnabarResult<Keyspace> {
    let aof_path = config.aof_path();
    if config.aof_enabled && std::path::Path::new(&aof_path).exists() {
        let mut ks = Keyspace::with_capacity(config.keys_capacity);
        let applied = aof::replay(&aof_path, &mut ks, config)?;
        ks.sweep_expired();
        ks.dirty = 0;
        info!("replayed {applied} commands from {aof_path}");
        return Ok(ks);
    }

    let rdb_path = config.rdb_path();
    if std::path::Path::new(&rdb_path).exists() {
        let mut ks = rdb::load(&rdb_path, config.keys_capacity)
            .map_err(|e| CinnabarError::CorruptSnapshot(e.to_string()))?;
        ks.sweep_expired();
        ks.dirty = 0;
        info!("loaded snapshot from {rdb_path}");
        return Ok(ks);
    }

    Ok(Keyspace::with_capacity(config.keys_capacity))
}

/// Run a background save over a point-in-time clone of the keyspace.
/// The caller must already have set `bgsave_in_progress`; completion
/// clears it, stamps the save time and subtracts the snapshotted change
/// count from the live counter.
pub fn spawn_background_save(
    store: SharedKeyspace,
    coord: SharedCoordinator,
    path: String,
    snapshot: Keyspace,
) {
    tokio::spawn(async move {
        let snapshot_dirty = snapshot.dirty;
        let result = tokio::task::spawn_blocking(move || rdb::save(&snapshot, &path)).await;

        let mut ks = store.write().await;
        let mut co = coord.lock().await;
        co.bgsave_in_progress = false;
        match result {
            Ok(Ok(())) => {
                ks.dirty = ks.dirty.saturating_sub(snapshot_dirty);
                co.last_save_secs = now_seconds();
                co.last_bgsave_status = "ok".to_string();
                info!("background save complete");
            }
            Ok(Err(e)) => {
                warn!("background save failed: {e}");
                co.last_bgsave_status = format!("err: {e}");
            }
            Err(e) => {
                warn!("background save task failed: {e}");
                co.last_bgsave_status = format!("err: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::Entry;
    use crate::types::string::StringValue;
    use crate::types::Value;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            dir: dir.to_str().unwrap().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_recover_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ks = recover(&config_in(dir.path())).unwrap();
        assert!(ks.is_empty());
    }

    #[test]
    fn test_recover_prefers_aof_over_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.aof_enabled = true;

        // Snapshot says k=from-rdb
        let mut snap = Keyspace::new();
        snap.set(
            b"k".to_vec(),
            Entry::new(Value::String(StringValue::new(b"from-rdb".to_vec()))),
        );
        rdb::save(&snap, &config.rdb_path()).unwrap();

        // Log says k=from-aof
        let mut writer = aof::AofWriter::new();
        writer
            .open(&config.aof_path(), aof::FsyncPolicy::Always)
            .unwrap();
        writer
            .append(
                "SET",
                &[
                    RespValue::bulk_string(b"k".to_vec()),
                    RespValue::bulk_string(b"from-aof".to_vec()),
                ],
            )
            .unwrap();
        writer.close();

        let mut ks = recover(&config).unwrap();
        match &ks.get(b"k").unwrap().value {
            Value::String(s) => assert_eq!(s.as_bytes(), b"from-aof"),
            other => panic!("wrong type: {}", other.type_name()),
        }
    }

    #[test]
    fn test_recover_corrupt_snapshot_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(config.rdb_path(), b"garbage").unwrap();
        assert!(matches!(
            recover(&config),
            Err(CinnabarError::CorruptSnapshot(_))
        ));
    }
}
