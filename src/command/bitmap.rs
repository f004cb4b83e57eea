use crate::command::{arg_to_i64, arg_to_string, arg_to_u64, arg_to_vec, wrong_arg_count, wrong_type_error};
use crate::config::Config;
use crate::resp::RespValue;
use crate::store::entry::Entry;
use crate::store::Keyspace;
use crate::types::bitmap::{self, BitOp};
use crate::types::string::StringValue;
use crate::types::Value;

fn bit_offset_error() -> RespValue {
    RespValue::error("ERR bit offset is not an integer or out of range")
}

/// Resolve a key to its string payload for bit reads: a missing key is
/// the empty payload, a key of another type is an error.
fn peek_string<'a>(ks: &'a Keyspace, key: &[u8]) -> Result<&'a [u8], RespValue> {
    match ks.peek(key) {
        Some(entry) => match &entry.value {
            Value::String(s) => Ok(s.as_bytes()),
            _ => Err(wrong_type_error()),
        },
        None => Ok(&[]),
    }
}

/// SETBIT key offset value — extends the string with zero bytes to
/// cover the addressed bit; returns the prior bit.
pub fn setbit(args: &[RespValue], ks: &mut Keyspace, config: &Config) -> RespValue {
    if args.len() != 3 {
        return wrong_arg_count("setbit");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let offset = match arg_to_u64(&args[1]) {
        Some(o) => o,
        None => return bit_offset_error(),
    };
    let value = match arg_to_string(&args[2]).as_deref() {
        Some("0") => false,
        Some("1") => true,
        _ => return RespValue::error("ERR bit is not an integer or out of range"),
    };

    if (offset / 8 + 1) as usize > config.max_value_bytes {
        return bit_offset_error();
    }

    if !ks.exists(&key) {
        ks.set(
            key.clone(),
            Entry::new(Value::String(StringValue::new(Vec::new()))),
        );
    }

    match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::String(s) => {
                let old = bitmap::set_bit(s.bytes_mut(), offset, value);
                RespValue::integer(if old { 1 } else { 0 })
            }
            _ => wrong_type_error(),
        },
        None => unreachable!(),
    }
}

/// GETBIT key offset — 0 for a missing key or an offset past the end.
pub fn getbit(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("getbit");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let offset = match arg_to_u64(&args[1]) {
        Some(o) => o,
        None => return bit_offset_error(),
    };

    match peek_string(ks, &key) {
        Ok(data) => RespValue::integer(if bitmap::get_bit(data, offset) { 1 } else { 0 }),
        Err(e) => e,
    }
}

/// BITCOUNT key [start end] — byte range, negative bounds from the tail.
pub fn bitcount(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 && args.len() != 3 {
        return wrong_arg_count("bitcount");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    let (start, end) = if args.len() == 3 {
        match (arg_to_i64(&args[1]), arg_to_i64(&args[2])) {
            (Some(start), Some(end)) => (Some(start), Some(end)),
            _ => return RespValue::error("ERR value is not an integer or out of range"),
        }
    } else {
        (None, None)
    };

    match peek_string(ks, &key) {
        Ok(data) => RespValue::integer(bitmap::count_range(data, start, end) as i64),
        Err(e) => e,
    }
}

/// BITOP AND|OR|XOR|NOT destkey srckey [srckey ...] — the destination
/// takes the length of the longest source; returns that length.
pub fn bitop(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 3 {
        return wrong_arg_count("bitop");
    }
    let op = match arg_to_string(&args[0]).and_then(|s| BitOp::parse(&s)) {
        Some(op) => op,
        None => return RespValue::error("ERR syntax error"),
    };
    let dest = match arg_to_vec(&args[1]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    if op == BitOp::Not && args.len() != 3 {
        return RespValue::error("ERR BITOP NOT must be called with a single source key");
    }

    let mut source_keys = Vec::with_capacity(args.len() - 2);
    for arg in &args[2..] {
        match arg_to_vec(arg) {
            Some(k) => source_keys.push(k),
            None => return RespValue::error("ERR invalid key"),
        }
    }

    // The destination is written as a string; an existing key of a
    // different type is refused like any other cross-type overwrite.
    match ks.peek(&dest) {
        Some(entry) if !matches!(entry.value, Value::String(_)) => return wrong_type_error(),
        _ => {}
    }

    let mut sources: Vec<&[u8]> = Vec::with_capacity(source_keys.len());
    for key in &source_keys {
        match peek_string(ks, key) {
            Ok(data) => sources.push(data),
            Err(e) => return e,
        }
    }

    let result = bitmap::bit_op(op, &sources);
    let len = result.len() as i64;

    if result.is_empty() {
        ks.del(&dest);
    } else {
        ks.set(dest, Entry::new(Value::String(StringValue::new(result))));
    }

    RespValue::integer(len)
}

/// BITPOS key bit [start [end]] — byte-range search; -1 when absent.
pub fn bitpos(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 2 || args.len() > 4 {
        return wrong_arg_count("bitpos");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(-1),
    };
    let bit = match arg_to_string(&args[1]).as_deref() {
        Some("0") => false,
        Some("1") => true,
        _ => return RespValue::error("ERR The bit argument must be 1 or 0."),
    };

    let start = if args.len() >= 3 {
        match arg_to_i64(&args[2]) {
            Some(s) => Some(s),
            None => return RespValue::error("ERR value is not an integer or out of range"),
        }
    } else {
        None
    };
    let end = if args.len() == 4 {
        match arg_to_i64(&args[3]) {
            Some(e) => Some(e),
            None => return RespValue::error("ERR value is not an integer or out of range"),
        }
    } else {
        None
    };

    match peek_string(ks, &key) {
        Ok(data) => RespValue::integer(bitmap::bit_pos(data, bit, start, end)),
        Err(e) => e,
    }
}
