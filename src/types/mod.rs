pub mod bitmap;
pub mod hash;
pub mod hyperloglog;
pub mod list;
pub mod set;
pub mod sorted_set;

pub mod string;

/// The core value type stored in the keyspace. A key holds exactly one
/// variant at a time; bitmap and HyperLogLog commands operate on the
/// `String` variant's bytes.
#[derive(Debug, Clone)]
pub enum Value {
    String(string::StringValue),
    List(list::ListValue),
    Hash(hash::HashValue),
    Set(set::SetValue),
    SortedSet(sorted_set::SortedSetValue),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }
}
