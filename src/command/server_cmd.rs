use crate::command::{arg_to_string, wrong_arg_count, CommandContext};
use crate::connection::{ClientState, ShutdownMode};
use crate::persistence::rdb;
use crate::resp::RespValue;
use crate::store::entry::now_seconds;
use std::sync::atomic::Ordering;
use tracing::error;

/// PING [message]
pub fn ping(args: &[RespValue]) -> RespValue {
    match args.len() {
        0 => RespValue::simple_string("PONG"),
        1 => match args[0].as_str() {
            Some(msg) => RespValue::bulk_string(msg.to_vec()),
            None => RespValue::simple_string("PONG"),
        },
        _ => wrong_arg_count("ping"),
    }
}

/// ECHO message
pub fn echo(args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("echo");
    }
    match args[0].as_str() {
        Some(msg) => RespValue::bulk_string(msg.to_vec()),
        None => RespValue::null_bulk_string(),
    }
}

/// QUIT
pub fn quit(client: &mut ClientState) -> RespValue {
    client.should_close = true;
    RespValue::ok()
}

/// SAVE — synchronous foreground snapshot; the reply carries any I/O
/// failure.
pub fn save(ctx: &mut CommandContext) -> RespValue {
    let path = ctx.config.rdb_path();
    match rdb::save(ctx.ks, &path) {
        Ok(()) => {
            ctx.ks.dirty = 0;
            ctx.coord.last_save_secs = now_seconds();
            ctx.coord.last_bgsave_status = "ok".to_string();
            RespValue::ok()
        }
        Err(e) => {
            error!("snapshot save failed: {e}");
            RespValue::error(format!("ERR {e}"))
        }
    }
}

/// BGSAVE — stages a point-in-time clone; the dispatcher starts the
/// actual file write once the locks are released. At most one runs at a
/// time.
pub fn bgsave(ctx: &mut CommandContext) -> RespValue {
    if ctx.coord.bgsave_in_progress {
        return RespValue::error("ERR Background save already in progress");
    }
    ctx.coord.bgsave_in_progress = true;
    ctx.coord.pending_bgsave = Some(ctx.ks.clone());
    RespValue::simple_string("Background saving started")
}

/// LASTSAVE — unix time of the last successful snapshot.
pub fn lastsave(ctx: &mut CommandContext) -> RespValue {
    RespValue::integer(ctx.coord.last_save_secs as i64)
}

/// SHUTDOWN [NOSAVE|SAVE] — the reply goes out first; the connection
/// loop then signals the server to run the shutdown sequence.
pub fn shutdown(args: &[RespValue], client: &mut ClientState) -> RespValue {
    let mode = match args.first().and_then(arg_to_string) {
        None => ShutdownMode::Default,
        Some(s) if s.eq_ignore_ascii_case("NOSAVE") => ShutdownMode::NoSave,
        Some(s) if s.eq_ignore_ascii_case("SAVE") => ShutdownMode::Save,
        Some(_) => return RespValue::error("ERR syntax error"),
    };
    client.shutdown_requested = Some(mode);
    client.should_close = true;
    RespValue::simple_string("OK - shutting down")
}

/// INFO [section] — `server`, `persistence`, `stats`, `memory`.
pub fn info(args: &[RespValue], ctx: &mut CommandContext) -> RespValue {
    let section_filter: Option<String> = args
        .first()
        .and_then(arg_to_string)
        .map(|s| s.to_lowercase());

    let show = |name: &str| -> bool {
        match &section_filter {
            None => true,
            Some(filter) => filter == name || filter == "all" || filter == "default",
        }
    };

    let mut info = String::new();

    if show("server") {
        info.push_str("# server\r\n");
        info.push_str("server_name:cinnabar\r\n");
        info.push_str(&format!("server_version:{}\r\n", env!("CARGO_PKG_VERSION")));
        info.push_str(&format!("process_id:{}\r\n", std::process::id()));
        info.push_str(&format!("tcp_port:{}\r\n", ctx.config.port));
        info.push_str(&format!(
            "uptime_in_seconds:{}\r\n",
            ctx.stats.uptime_seconds()
        ));
        info.push_str("\r\n");
    }

    if show("persistence") {
        info.push_str("# persistence\r\n");
        info.push_str(&format!(
            "rdb_enabled:{}\r\n",
            if ctx.config.rdb_enabled { 1 } else { 0 }
        ));
        info.push_str(&format!("rdb_changes_since_last_save:{}\r\n", ctx.ks.dirty));
        info.push_str(&format!(
            "rdb_bgsave_in_progress:{}\r\n",
            if ctx.coord.bgsave_in_progress { 1 } else { 0 }
        ));
        info.push_str(&format!(
            "rdb_last_save_time:{}\r\n",
            ctx.coord.last_save_secs
        ));
        info.push_str(&format!(
            "rdb_last_bgsave_status:{}\r\n",
            ctx.coord.last_bgsave_status
        ));
        info.push_str(&format!(
            "aof_enabled:{}\r\n",
            if ctx.coord.aof.is_active() { 1 } else { 0 }
        ));
        info.push_str(&format!(
            "aof_rewrite_in_progress:{}\r\n",
            if ctx.coord.aof_rewrite_in_progress { 1 } else { 0 }
        ));
        info.push_str(&format!(
            "aof_last_write_status:{}\r\n",
            ctx.coord.last_aof_write_status
        ));
        info.push_str(&format!("aof_current_size:{}\r\n", ctx.coord.aof.size()));
        info.push_str("\r\n");
    }

    if show("stats") {
        info.push_str("# stats\r\n");
        info.push_str(&format!(
            "total_connections_received:{}\r\n",
            ctx.stats.connections_received.load(Ordering::Relaxed)
        ));
        info.push_str(&format!(
            "total_commands_processed:{}\r\n",
            ctx.stats.commands_processed.load(Ordering::Relaxed)
        ));
        info.push_str(&format!(
            "connected_clients:{}\r\n",
            ctx.stats.connected_clients.load(Ordering::Relaxed)
        ));
        info.push_str(&format!("keyspace_keys:{}\r\n", ctx.ks.len()));
        info.push_str(&format!("keyspace_expires:{}\r\n", ctx.ks.expires_count()));
        info.push_str(&format!("expired_keys:{}\r\n", ctx.ks.expired_keys));
        info.push_str(&format!(
            "pubsub_channels:{}\r\n",
            ctx.pubsub.channels().len()
        ));
        info.push_str("\r\n");
    }

    if show("memory") {
        info.push_str("# memory\r\n");
        let used = ctx.ks.estimated_memory();
        info.push_str(&format!("used_memory:{used}\r\n"));
        info.push_str(&format!("used_memory_human:{}\r\n", human_bytes(used)));
        info.push_str(&format!(
            "max_value_bytes:{}\r\n",
            ctx.config.max_value_bytes
        ));
        info.push_str("\r\n");
    }

    RespValue::bulk_string(info.into_bytes())
}

fn human_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}
