use crate::resp::RespValue;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// How SHUTDOWN should treat the final snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Snapshot only when snapshots are enabled (default, also Ctrl-C).
    Default,
    /// Always write a final snapshot.
    Save,
    /// Skip the final snapshot.
    NoSave,
}

/// Per-client connection state. Created on connect, torn down on
/// disconnect; owned by the connection task and lent to the dispatcher.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    pub should_close: bool,

    // Transaction state
    pub in_multi: bool,
    /// Set when a queued command failed validation; EXEC then discards
    /// the queue and returns a null array.
    pub multi_aborted: bool,
    pub multi_queue: Vec<(String, Vec<RespValue>)>,
    /// Keys armed by WATCH with the revision observed at watch time.
    pub watched_keys: Vec<(Vec<u8>, u64)>,

    /// Side channel for server-initiated pushes (pub/sub messages).
    pub push_tx: mpsc::UnboundedSender<RespValue>,

    /// Set by the SHUTDOWN handler; acted on after the reply is written.
    pub shutdown_requested: Option<ShutdownMode>,
}

impl ClientState {
    pub fn new(push_tx: mpsc::UnboundedSender<RespValue>) -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            should_close: false,
            in_multi: false,
            multi_aborted: false,
            multi_queue: Vec::new(),
            watched_keys: Vec::new(),
            push_tx,
            shutdown_requested: None,
        }
    }

    /// A client with no connection behind it, for replay and tests.
    pub fn detached() -> Self {
        let (push_tx, _) = mpsc::unbounded_channel();
        Self::new(push_tx)
    }
}
