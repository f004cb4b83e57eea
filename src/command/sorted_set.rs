use crate::command::{
    arg_to_f64, arg_to_i64, arg_to_string, arg_to_vec, not_a_float, not_an_integer,
    wrong_arg_count, wrong_type_error,
};
use crate::resp::RespValue;
use crate::store::entry::Entry;
use crate::store::Keyspace;
use crate::types::sorted_set::{format_score, ScoreBound, SortedSetValue};
use crate::types::Value;

fn get_or_create_zset<'a>(
    ks: &'a mut Keyspace,
    key: &[u8],
) -> Result<&'a mut SortedSetValue, RespValue> {
    if !ks.exists(key) {
        ks.set(
            key.to_vec(),
            Entry::new(Value::SortedSet(SortedSetValue::new())),
        );
    }
    match ks.get_mut(key) {
        Some(entry) => match &mut entry.value {
            Value::SortedSet(z) => Ok(z),
            _ => Err(wrong_type_error()),
        },
        None => unreachable!(),
    }
}

fn parse_bound(arg: &RespValue) -> Result<ScoreBound, RespValue> {
    arg_to_string(arg)
        .and_then(|s| ScoreBound::parse(&s))
        .ok_or_else(|| RespValue::error("ERR min or max is not a float"))
}

fn pairs_reply(pairs: Vec<(&[u8], f64)>, with_scores: bool) -> RespValue {
    let mut items = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (member, score) in pairs {
        items.push(RespValue::bulk_string(member.to_vec()));
        if with_scores {
            items.push(RespValue::bulk_string(format_score(score).into_bytes()));
        }
    }
    RespValue::array(items)
}

/// Parse a trailing optional WITHSCORES token.
fn parse_withscores(args: &[RespValue], fixed: usize) -> Result<bool, RespValue> {
    if args.len() == fixed {
        return Ok(false);
    }
    match arg_to_string(&args[fixed]) {
        Some(s) if s.eq_ignore_ascii_case("WITHSCORES") => Ok(true),
        _ => Err(RespValue::error("ERR syntax error")),
    }
}

/// ZADD key score member [score member ...] — returns the number of
/// members added, not updated.
pub fn zadd(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 3 || args.len() % 2 == 0 {
        return wrong_arg_count("zadd");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    // Validate every score before mutating anything.
    let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
    for pair in args[1..].chunks(2) {
        let score = match arg_to_f64(&pair[0]) {
            Some(s) => s,
            None => return not_a_float(),
        };
        let member = match arg_to_vec(&pair[1]) {
            Some(m) => m,
            None => return RespValue::error("ERR invalid member"),
        };
        pairs.push((member, score));
    }

    let zset = match get_or_create_zset(ks, &key) {
        Ok(z) => z,
        Err(e) => return e,
    };

    let mut added = 0i64;
    for (member, score) in pairs {
        if zset.add(member, score) {
            added += 1;
        }
    }
    RespValue::integer(added)
}

/// ZREM key member [member ...]
pub fn zrem(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 2 {
        return wrong_arg_count("zrem");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    let mut removed = 0i64;
    let mut emptied = false;
    match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::SortedSet(z) => {
                for arg in &args[1..] {
                    if let Some(member) = arg_to_vec(arg) {
                        if z.remove(&member) {
                            removed += 1;
                        }
                    }
                }
                emptied = z.is_empty();
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

/// ZCARD key
pub fn zcard(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 1 {
        return wrong_arg_count("zcard");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::SortedSet(z) => RespValue::integer(z.len() as i64),
            _ => wrong_type_error(),
        },
        None => RespValue::integer(0),
    }
}

/// ZCOUNT key min max
pub fn zcount(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 3 {
        return wrong_arg_count("zcount");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::integer(0),
    };
    let min = match parse_bound(&args[1]) {
        Ok(b) => b,
        Err(e) => return e,
    };
    let max = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return e,
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::SortedSet(z) => RespValue::integer(z.count(min, max) as i64),
            _ => wrong_type_error(),
        },
        None => RespValue::integer(0),
    }
}

/// ZSCORE key member
pub fn zscore(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 2 {
        return wrong_arg_count("zscore");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::null_bulk_string(),
    };
    let member = match arg_to_vec(&args[1]) {
        Some(m) => m,
        None => return RespValue::null_bulk_string(),
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::SortedSet(z) => match z.score(&member) {
                Some(score) => RespValue::bulk_string(format_score(score).into_bytes()),
                None => RespValue::null_bulk_string(),
            },
            _ => wrong_type_error(),
        },
        None => RespValue::null_bulk_string(),
    }
}

/// ZINCRBY key increment member — inserts a missing member with the
/// increment as its initial score; returns the new score.
pub fn zincrby(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() != 3 {
        return wrong_arg_count("zincrby");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let delta = match arg_to_f64(&args[1]) {
        Some(d) => d,
        None => return not_a_float(),
    };
    let member = match arg_to_vec(&args[2]) {
        Some(m) => m,
        None => return RespValue::error("ERR invalid member"),
    };

    let zset = match get_or_create_zset(ks, &key) {
        Ok(z) => z,
        Err(e) => return e,
    };

    let new_score = zset.incr_by(member, delta);
    RespValue::bulk_string(format_score(new_score).into_bytes())
}

/// ZRANGE key start stop [WITHSCORES]
pub fn zrange(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    rank_range(args, ks, "zrange", false)
}

/// ZREVRANGE key start stop [WITHSCORES]
pub fn zrevrange(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    rank_range(args, ks, "zrevrange", true)
}

fn rank_range(args: &[RespValue], ks: &mut Keyspace, name: &str, rev: bool) -> RespValue {
    if args.len() < 3 || args.len() > 4 {
        return wrong_arg_count(name);
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };
    let (start, stop) = match (arg_to_i64(&args[1]), arg_to_i64(&args[2])) {
        (Some(start), Some(stop)) => (start, stop),
        _ => return not_an_integer(),
    };
    let with_scores = match parse_withscores(args, 3) {
        Ok(w) => w,
        Err(e) => return e,
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::SortedSet(z) => {
                let pairs = if rev {
                    z.rev_range(start, stop)
                } else {
                    z.range(start, stop)
                };
                pairs_reply(pairs, with_scores)
            }
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}

/// ZRANGEBYSCORE key min max [WITHSCORES] — min/max accept `-inf`,
/// `+inf` and the `(` exclusive prefix.
pub fn zrangebyscore(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 3 || args.len() > 4 {
        return wrong_arg_count("zrangebyscore");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::array(vec![]),
    };
    let min = match parse_bound(&args[1]) {
        Ok(b) => b,
        Err(e) => return e,
    };
    let max = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return e,
    };
    let with_scores = match parse_withscores(args, 3) {
        Ok(w) => w,
        Err(e) => return e,
    };

    match ks.get(&key) {
        Some(entry) => match &entry.value {
            Value::SortedSet(z) => pairs_reply(z.range_by_score(min, max), with_scores),
            _ => wrong_type_error(),
        },
        None => RespValue::array(vec![]),
    }
}
