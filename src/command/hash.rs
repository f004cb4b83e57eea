use crate::command::{arg_to_vec, wrong_arg_count, wrong_type_error};
use crate::resp::RespValue;
use crate::store::entry::Entry;
use crate::store::Keyspace;
use crate::types::hash::HashValue;
use crate::types::Value;

fn get_or_create_hash<'a>(
    ks: &'a mut Keyspace,
    key: &[u8],
) -> Result<&'a mut HashValue, RespValue> {
    if !ks.exists(key) {
        ks.set(key.to_vec(), Entry::new(Value::Hash(HashValue::new())));
    }
    match ks.get_mut(key) {
        Some(entry) => match &mut entry.value {
            Value::Hash(h) => Ok(h),
            _ => Err(wrong_type_error()),
        },
        None => unreachable!(),
    }
}

/// HSET key field value [field value ...] — returns the number of new
/// fields.
pub fn hset(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 3 || args.len() % 2 == 0 {
        return wrong_arg_count("hset");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    let hash = match get_or_create_hash(ks, &key) {
        Ok(h) => h,
        Err(e) => return e,
    };

    let mut new_fields = 0i64;
    for pair in args[1..].chunks(2) {
        if let (Some(field), Some(value)) = (arg_to_vec(&pair[0]), arg_to_vec(&pair[1])) {
            if hash.set(field, value) {
                new_fields += 1;
            }
        }
    }
    RespValue::integer(new_fields)
}

/// HGET key field
pub fn hget(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("hget");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::null_bulk_string(),
    };
    let field = match arg_to_vec(&args[1]) {
        Some(f) => f,
        None => return RespValue::null_bulk_string(),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Hash(h) => match h.get(&field) {
                Some(value) => RespValue::bulk_string(value.clone()),
                None => RespValue::null_bulk_string(),
            },
            _ => wrong_type_error(),
        },
        None => RespValue::null_bulk_string(),
    }
}

/// HDEL key field [field ...] — deletes the key once its last field is
/// gone.
pub fn hdel(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 2 {
        return wrong_arg_count("hdel");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    let mut removed = 0i64;
    let mut emptied = false;
    match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::Hash(h) => {
                for arg in &args[1..] {
                    if let Some(field) = arg_to_vec(arg) {
                        if h.del(&field) {
                            removed += 1;
                        }
                    }
                }
                emptied = h.is_empty();
            }
            _ => return wrong_type_error(),
        },
        None => return RespValue::integer(0),
    }

    if emptied {
        ks.del(&key);
    }
    RespValue::integer(removed)
}

/// HKEYS key
pub fn hkeys(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("hkeys");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Hash(h) => RespValue::array(
                h.keys()
                    .into_iter()
                    .map(|f| RespValue::bulk_string(f.clone()))
                    .collect(),
            ),
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}

/// HVALS key
pub fn hvals(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("hvals");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Hash(h) => RespValue::array(
                h.values()
                    .into_iter()
                    .map(|v| RespValue::bulk_string(v.clone()))
                    .collect(),
            ),
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}

/// HGETALL key — a flat field, value, field, value array.
pub fn hgetall(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("hgetall");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Hash(h) => {
                let mut items = Vec::with_capacity(h.len() * 2);
                for (field, value) in h.iter() {
                    items.push(RespValue::bulk_string(field.clone()));
                    items.push(RespValue::bulk_string(value.clone()));
                }
                RespValue::array(items)
            }
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}
