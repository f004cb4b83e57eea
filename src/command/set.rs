use crate::command::{arg_to_i64, arg_to_vec, not_an_integer, wrong_arg_count, wrong_type_error};
use crate::resp::RespValue;
use crate::store::entry::Entry;
use crate::store::Keyspace;
use crate::types::set::SetValue;
use crate::types::Value;

fn get_or_create_set<'a>(ks: &'a mut Keyspace, key: &[u8]) -> Result<&'a mut SetValue, RespValue> {
    if !ks.exists(key) {
        ks.set(key.to_vec(), Entry::new(Value::Set(SetValue::new())));
    }
    match ks.get_mut(key) {
        Some(entry) => match &mut entry.value {
            Value::Set(s) => Ok(s),
            _ => Err(wrong_type_error()),
        },
        None => unreachable!(),
    }
}

/// Resolve a key to its set for algebra commands: a missing key is the
/// empty set, a key of another type is an error.
fn peek_set<'a>(ks: &'a Keyspace, key: &[u8]) -> Result<Option<&'a SetValue>, RespValue> {
    match ks.peek(key) {
        Some(entry) => match &entry.value {
            Value::Set(s) => Ok(Some(s)),
            _ => Err(wrong_type_error()),
        },
        None => Ok(None),
    }
}

/// SADD key member [member ...]
pub fn sadd(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 2 {
        return wrong_arg_count("sadd");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    let set = match get_or_create_set(ks, &key) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let mut added = 0i64;
    for arg in &args[1..] {
        if let Some(member) = arg_to_vec(arg) {
            if set.add(member) {
                added += 1;
            }
        }
    }
    RespValue::integer(added)
}

/// SREM key member [member ...] — deletes the key once it empties.
pub fn srem(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 2 {
        return wrong_arg_count("srem");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    let mut removed = 0i64;
    let mut emptied = false;
    match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::Set(s) => {
                for arg in &args[1..] {
                    if let Some(member) = arg_to_vec(arg) {
                        if s.remove(&member) {
                            removed += 1;
                        }
                    }
                }
                emptied = s.is_empty();
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

/// SCARD key
pub fn scard(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("scard");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Set(s) => RespValue::integer(s.len() as i64),
            _ => wrong_type_error(),
        },
        None => RespValue::integer(0),
    }
}

/// SMEMBERS key
pub fn smembers(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("smembers");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Set(s) => RespValue::array(
                s.members()
                    .into_iter()
                    .map(|m| RespValue::bulk_string(m.clone()))
                    .collect(),
            ),
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}

/// SISMEMBER key member
pub fn sismember(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("sismember");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let member = match arg_to_vec(&args[1]) {
        Some(m) => m,
        None => return RespValue::integer(0),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Set(s) => RespValue::integer(if s.contains(&member) { 1 } else { 0 }),
            _ => wrong_type_error(),
        },
        None => RespValue::integer(0),
    }
}

/// SMOVE source destination member
pub fn smove(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 3 {
        return wrong_arg_count("smove");
    }
    let src = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let dst = match arg_to_vec(&args[1]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let member = match arg_to_vec(&args[2]) {
        Some(m) => m,
        None => return RespValue::integer(0),
    };

    // Validate both endpoints before mutating either.
    let src_has_member = match peek_set(ks, &src) {
        Ok(Some(s)) => s.contains(&member),
        Ok(None) => false,
        Err(e) => return e,
    };
    if let Err(e) = peek_set(ks, &dst) {
        return e;
    }
    if !src_has_member {
        return RespValue::integer(0);
    }

    if src == dst {
        return RespValue::integer(1);
    }

    let mut emptied = false;
    if let Some(entry) = ks.get_mut(&src) {
        if let Value::Set(s) = &mut entry.value {
            s.remove(&member);
            emptied = s.is_empty();
        }
    }
    if emptied {
        ks.del(&src);
    }

    match get_or_create_set(ks, &dst) {
        Ok(s) => {
            s.add(member);
            RespValue::integer(1)
        }
        Err(e) => e,
    }
}

/// SPOP key [count] — uniform random removal.
pub fn spop(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.is_empty() || args.len() > 2 {
        return wrong_arg_count("spop");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::null_bulk_string(),
    };

    let count = if args.len() == 2 {
        match arg_to_i64(&args[1]) {
            Some(c) if c >= 0 => Some(c as usize),
            Some(_) => return RespValue::error("ERR value is out of range, must be positive"),
            None => return not_an_integer(),
        }
    } else {
        None
    };

    let (reply, emptied) = match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::Set(s) => {
                let reply = match count {
                    None => match s.pop_random() {
                        Some(member) => RespValue::bulk_string(member),
                        None => RespValue::null_bulk_string(),
                    },
                    Some(count) => RespValue::array(
                        s.pop_random_many(count)
                            .into_iter()
                            .map(RespValue::bulk_string)
                            .collect(),
                    ),
                };
                (reply, s.is_empty())
            }
            _ => return wrong_type_error(),
        },
        None => {
            return match count {
                None => RespValue::null_bulk_string(),
                Some(_) => RespValue::array(vec![]),
            }
        }
    };

    if emptied {
        ks.del(&key);
    }
    reply
}

/// SRANDMEMBER key [count] — a negative count permits duplicates.
pub fn srandmember(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.is_empty() || args.len() > 2 {
        return wrong_arg_count("srandmember");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::null_bulk_string(),
    };

    let count = if args.len() == 2 {
        match arg_to_i64(&args[1]) {
            Some(c) => Some(c),
            None => return not_an_integer(),
        }
    } else {
        None
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::Set(s) => match count {
                None => match s.random_members(1).pop() {
                    Some(member) => RespValue::bulk_string(member),
                    None => RespValue::null_bulk_string(),
                },
                Some(count) => RespValue::array(
                    s.random_members(count)
                        .into_iter()
                        .map(RespValue::bulk_string)
                        .collect(),
                ),
            },
            _ => wrong_type_error(),
        },
        None => match count {
            None => RespValue::null_bulk_string(),
            Some(_) => RespValue::array(vec![]),
        },
    }
}

/// SINTER key [key ...]
pub fn sinter(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    set_algebra(args, ks, "sinter")
}

/// SUNION key [key ...]
pub fn sunion(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    set_algebra(args, ks, "sunion")
}

/// SDIFF key [key ...]
pub fn sdiff(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    set_algebra(args, ks, "sdiff")
}

fn set_algebra(args: &[RespValue], ks: &mut Keyspace, op: &str) -> RespValue {
    if args.is_empty() {
        return wrong_arg_count(op);
    }

    let mut keys = Vec::with_capacity(args.len());
    for arg in args {
        match arg_to_vec(arg) {
            Some(k) => keys.push(k),
            None => return RespValue::error("ERR invalid key"),
        }
    }

    let empty = SetValue::new();
    let mut sets = Vec::with_capacity(keys.len());
    for key in &keys {
        match peek_set(ks, key) {
            Ok(Some(s)) => sets.push(s),
            Ok(None) => sets.push(&empty),
            Err(e) => return e,
        }
    }

    let mut result = sets[0].clone();
    for other in &sets[1..] {
        result = match op {
            "sinter" => result.intersect(other),
            "sunion" => result.union(other),
            _ => result.difference(other),
        };
    }

    RespValue::array(
        result
            .members()
            .into_iter()
            .map(|m| RespValue::bulk_string(m.clone()))
            .collect(),
    )
}
