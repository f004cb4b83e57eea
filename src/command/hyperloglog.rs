use crate::command::{arg_to_bytes, arg_to_vec, wrong_arg_count, wrong_type_error};
use crate::resp::RespValue;
use crate::store::entry::Entry;
use crate::store::Keyspace;
use crate::types::hyperloglog as hll;
use crate::types::string::StringValue;
use crate::types::Value;

fn not_a_hll() -> RespValue {
    RespValue::error("WRONGTYPE Key is not a valid HyperLogLog string value.")
}

/// Resolve a key for PFCOUNT/PFMERGE sources: missing keys contribute
/// nothing, strings must carry the register encoding, other types are
/// plain type errors.
fn peek_registers<'a>(ks: &'a Keyspace, key: &[u8]) -> Result<Option<&'a [u8]>, RespValue> {
    match ks.peek(key) {
        Some(entry) => match &entry.value {
            Value::String(s) if hll::is_valid(s.as_bytes()) => Ok(Some(s.as_bytes())),
            Value::String(_) => Err(not_a_hll()),
            _ => Err(wrong_type_error()),
        },
        None => Ok(None),
    }
}

/// PFADD key [element ...] — returns 1 iff the structure changed
/// (including creation of a fresh key).
pub fn pfadd(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.is_empty() {
        return wrong_arg_count("pfadd");
    }
    let key = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    let mut changed = false;
    if !ks.exists(&key) {
        ks.set(
            key.clone(),
            Entry::new(Value::String(StringValue::new(hll::empty()))),
        );
        changed = true;
    }

    match ks.get_mut(&key) {
        Some(entry) => match &mut entry.value {
            Value::String(s) => {
                if !hll::is_valid(s.as_bytes()) {
                    return not_a_hll();
                }
                for arg in &args[1..] {
                    if let Some(element) = arg_to_bytes(arg) {
                        if hll::add(s.bytes_mut(), element) {
                            changed = true;
                        }
                    }
                }
                RespValue::integer(if changed { 1 } else { 0 })
            }
            _ => wrong_type_error(),
        },
        None => unreachable!(),
    }
}

/// PFCOUNT key [key ...] — multiple keys estimate the union without
/// materializing a merged key.
pub fn pfcount(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.is_empty() {
        return wrong_arg_count("pfcount");
    }

    let mut keys = Vec::with_capacity(args.len());
    for arg in args {
        match arg_to_vec(arg) {
            Some(k) => keys.push(k),
            None => return RespValue::error("ERR invalid key"),
        }
    }

    let mut sources: Vec<&[u8]> = Vec::with_capacity(keys.len());
    for key in &keys {
        match peek_registers(ks, key) {
            Ok(Some(data)) => sources.push(data),
            Ok(None) => {}
            Err(e) => return e,
        }
    }

    if sources.is_empty() {
        return RespValue::integer(0);
    }

    let count = if sources.len() == 1 {
        hll::count(sources[0])
    } else {
        hll::count_union(&sources)
    };
    RespValue::integer(count as i64)
}

/// PFMERGE destkey sourcekey [sourcekey ...] — writes the elementwise
/// register maximum into the destination.
pub fn pfmerge(args: &[RespValue], ks: &mut Keyspace) -> RespValue {
    if args.len() < 2 {
        return wrong_arg_count("pfmerge");
    }
    let dest = match arg_to_vec(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    let mut merged = match peek_registers(ks, &dest) {
        Ok(Some(data)) => data.to_vec(),
        Ok(None) => hll::empty(),
        Err(e) => return e,
    };

    for arg in &args[1..] {
        let key = match arg_to_vec(arg) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };
        match peek_registers(ks, &key) {
            Ok(Some(data)) => hll::merge_into(&mut merged, data),
            Ok(None) => {}
            Err(e) => return e,
        }
    }

    ks.set(dest, Entry::new(Value::String(StringValue::new(merged))));
    RespValue::ok()
}
