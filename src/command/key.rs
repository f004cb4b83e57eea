use crate::command::{arg_to_i64, arg_to_vec, not_an_integer, wrong_arg_count};
use crate::resp::RespValue;
use crate::store::entry::{now_millis, now_seconds};
use crate::store::Keyspace;

/// DEL key [key ...]
pub fn del(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.is_empty() {
        return wrong_arg_count("del");
    }
    let mut removed = 0i64;
    for arg in args {
        if let Some(key) = arg_to_vec(arg) {
            if ks.del(&key) {
                removed += 1;
            }
        }
    }
    RespValue::integer(removed)
}

/// EXISTS key
pub fn exists(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("exists");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    RespValue::integer(if ks.exists(&key) { 1 } else { 0 })
}

/// EXPIRE key seconds — a non-positive TTL deletes the key immediately.
pub fn expire(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("expire");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let secs = match arg_to_i64(&args[1]) {
        Some(s) => s,
        None => return not_an_integer(),
    };

    if secs <= 0 {
        return RespValue::integer(if ks.del(&key) { 1 } else { 0 });
    }

    let deadline = now_millis() + secs as u64 * 1000;
    RespValue::integer(if ks.set_deadline(&key, deadline) { 1 } else { 0 })
}

/// EXPIREAT key unix-seconds — the absolute-deadline variant, also the
/// vehicle the append-only log uses for deadlines.
pub fn expire_at(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("expireat");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let at_secs = match arg_to_i64(&args[1]) {
        Some(s) => s,
        None => return not_an_integer(),
    };

    if at_secs <= now_seconds() as i64 {
        return RespValue::integer(if ks.del(&key) { 1 } else { 0 });
    }

    RespValue::integer(if ks.set_deadline(&key, at_secs as u64 * 1000) {
        1
    } else {
        0
    })
}

/// TTL key — -2 for a missing key, -1 for no deadline, else whole
/// seconds remaining.
pub fn ttl(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("ttl");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(-2),
    };

    match ks.get(&key) {
        Some(entry) => RespValue::integer(entry.ttl_seconds()),
        None => RespValue::integer(-2),
    }
}
