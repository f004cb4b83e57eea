use crate::command::{arg_to_vec, CommandContext};
use crate::connection::ClientState;
use crate::resp::RespValue;
use crate::store::Keyspace;

/// Queue-time handling while a MULTI is open: validate name and arity,
/// then either queue with `QUEUED` or mark the transaction aborted and
/// reply with the validation error.
pub fn queue_command(client: &mut ClientState, cmd_name: &str, args: &[RespValue]) -> RespValue {
    match super::lookup(cmd_name) {
        None => {
            client.multi_aborted = true;
            RespValue::error(format!("ERR unknown command '{cmd_name}'"))
        }
        Some(spec) if !spec.accepts(args.len()) => {
            client.multi_aborted = true;
            super::wrong_arg_count(cmd_name)
        }
        Some(_) => {
            client.multi_queue.push((cmd_name.to_string(), args.to_vec()));
            RespValue::simple_string("QUEUED")
        }
    }
}

/// MULTI
pub fn multi(client: &mut ClientState) -> RespValue {
    if client.in_multi {
        return RespValue::error("ERR MULTI calls can not be nested");
    }
    client.in_multi = true;
    client.multi_queue.clear();
    client.multi_aborted = false;
    RespValue::ok()
}

/// EXEC — runs the queue in order under the locks the dispatcher
/// already holds, so no other client's commands interleave with the
/// batch. An aborted or watch-dirtied transaction discards the queue
/// and returns a null array.
pub fn exec(ctx: &mut CommandContext) -> RespValue {
    if !ctx.client.in_multi {
        return RespValue::error("ERR EXEC without MULTI");
    }
    ctx.client.in_multi = false;

    if ctx.client.multi_aborted {
        ctx.client.multi_aborted = false;
        ctx.client.multi_queue.clear();
        ctx.client.watched_keys.clear();
        return RespValue::null_array();
    }

    let watch_dirty = ctx
        .client
        .watched_keys
        .iter()
        .any(|(key, revision)| ctx.ks.revision(key) != *revision);
    ctx.client.watched_keys.clear();

    if watch_dirty {
        ctx.client.multi_queue.clear();
        return RespValue::null_array();
    }

    let queue = std::mem::take(&mut ctx.client.multi_queue);
    let mut replies = Vec::with_capacity(queue.len());
    for (cmd_name, args) in &queue {
        replies.push(super::execute(ctx, cmd_name, args));
    }

    RespValue::array(replies)
}

/// DISCARD
pub fn discard(client: &mut ClientState) -> RespValue {
    if !client.in_multi {
        return RespValue::error("ERR DISCARD without MULTI");
    }
    client.in_multi = false;
    client.multi_queue.clear();
    client.multi_aborted = false;
    client.watched_keys.clear();
    RespValue::ok()
}

/// WATCH key [key ...] — snapshots each key's revision; EXEC compares.
pub fn watch(args: &[RespValue], ks: &mut Keyspace, client: &mut ClientState) -> RespValue {
    if args.is_empty() {
        return super::wrong_arg_count("watch");
    }
    if client.in_multi {
        return RespValue::error("ERR WATCH inside MULTI is not allowed");
    }

    for arg in args {
        if let Some(key) = arg_to_vec(arg) {
            let revision = ks.revision(&key);
            client.watched_keys.push((key, revision));
        }
    }
    RespValue::ok()
}

/// UNWATCH
pub fn unwatch(client: &mut ClientState) -> RespValue {
    client.watched_keys.clear();
    RespValue::ok()
}
