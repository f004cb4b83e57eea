use crate::command::{arg_to_i64, arg_to_vec, not_an_integer, wrong_arg_count, wrong_type_error};
use crate::resp::RespValue;
use crate::store::entry::Entry;
use crate::store::Keyspace;
use crate::types::list::ListValue;
use crate::types::Value;

fn get_or_create_list<'a>(
    ks: &'a mut Keyspace,
    key: &[u8],
) -> Result<&'a mut ListValue, RespValue> {
    if !ks.exists(key) {
        ks.set(key.to_vec(), Entry::new(Value::List(ListValue::new())));
    }
    match ks.get_mut(key) {
        Some(entry) => match &mut entry.value {
            Value::List(l) => Ok(l),
            _ => Err(wrong_type_error()),
        },
        None => unreachable!(),
    }
}

/// LPUSH key value [value ...] — returns the resulting length.
pub fn lpush(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    push(args, ks, true)
}

/// RPUSH key value [value ...] — returns the resulting length.
pub fn rpush(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    push(args, ks, false)
}

fn push(args: &[RespValue], ks: &mut Keyspace, front: bool) -> RespValue {
    if args.len() < 2 {
        return wrong_arg_count(if front { "lpush" } else { "rpush" });
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    let list = match get_or_create_list(ks, &key) {
        Ok(l) => l,
        Err(e) => return e,
    };

    for arg in &args[1..] {
        if let Some(value) = arg_to_vec(arg) {
            if front {
                list.push_front(value);
            } else {
                list.push_back(value);
            }
        }
    }
    RespValue::integer(list.len() as i64)
}

/// LPOP key
pub fn lpop(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    pop(args, ks, true)
}

/// RPOP key
pub fn rpop(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    pop(args, ks, false)
}

fn pop(args: &[RespValue], ks: &mut Keyspace, front: bool) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count(if front { "lpop" } else { "rpop" });
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::null_bulk_string(),
    };

    let (popped, emptied) = match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::List(l) => {
                let popped = if front { l.pop_front() } else { l.pop_back() };
                (popped, l.is_empty())
            }
            _ => return wrong_type_error(),
        },
        None => return RespValue::null_bulk_string(),
    };

    if emptied {
        ks.del(&key);
    }

    match popped {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null_bulk_string(),
    }
}

/// LLEN key
pub fn llen(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("llen");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::List(l) => RespValue::integer(l.len() as i64),
            _ => wrong_type_error(),
        },
        None => RespValue::integer(0),
    }
}

/// LRANGE key start stop
pub fn lrange(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 3 {
        return wrong_arg_count("lrange");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };
    let (start, stop) = match (arg_to_i64(&args[1]), arg_to_i64(&args[2])) {
        (Some(start), Some(stop)) => (start, stop),
        _ => return not_an_integer(),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::List(l) => RespValue::array(
                l.range(start, stop)
                    .into_iter()
                    .map(|v| RespValue::bulk_string(v.clone()))
                    .collect(),
            ),
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}
