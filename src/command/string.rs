use crate::command::{arg_to_i64, arg_to_string, arg_to_vec, wrong_arg_count, wrong_type_error};
use crate::config::Config;
use crate::resp::RespValue;
use crate::store::entry::{now_millis, Entry};
use crate::store::Keyspace;
use crate::types::string::StringValue;
use crate::types::Value;

/// SET key value [EX seconds]
pub fn set(args: &[RespValue], ks: &mut Keyspace, config: &Config) -> RespValue {
    if args.len() != 2 && args.len() != 4 {
        return wrong_arg_count("set");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let value = match arg_to_vec(&args[1]) {
        Some(v) => v,
        None => return RespValue::error("ERR invalid value"),
    };

    if value.len() > config.max_value_bytes {
        return RespValue::error("ERR value exceeds maximum allowed size");
    }

    let deadline = if args.len() == 4 {
        match arg_to_string(&args[2]) {
            Some(opt) if opt.eq_ignore_ascii_case("EX") => {}
            _ => return RespValue::error("ERR syntax error"),
        }
        match arg_to_i64(&args[3]) {
            Some(secs) if secs > 0 => Some(now_millis() + secs as u64 * 1000),
            Some(_) => return RespValue::error("ERR invalid expire time in 'set' command"),
            None => return RespValue::error("ERR value is not an integer or out of range"),
        }
    } else {
        None
    };

    // Overwriting a key of another type is refused; the existing type's
    // storage wins.
    match ks.get(&key) {
        Some(entry) if !matches!(entry.value, Value::String(_)) => return wrong_type_error(),
        _ => {}
    }

    let mut entry = Entry::new(Value::String(StringValue::new(value)));
    entry.expires_at = deadline;
    ks.set(key, entry);
    RespValue::ok()
}

/// GET key
pub fn get(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("get");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::null_bulk_string(),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::String(s) => RespValue::bulk_string(s.as_bytes().to_vec()),
            _ => wrong_type_error(),
        },
        None => RespValue::null_bulk_string(),
    }
}
