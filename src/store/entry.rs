use crate::types::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// An entry in the keyspace — a value plus its expiration deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Absolute deadline as milliseconds since the UNIX epoch.
    /// None = the key never expires.
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Entry {
            value,
            expires_at: None,
        }
    }

    /// Check if this entry's deadline has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => now_millis() >= deadline,
            None => false,
        }
    }

    /// Whole seconds remaining, or -1 if no deadline, or -2 if already
    /// past it.
    pub fn ttl_seconds(&self) -> i64 {
        match self.expires_at {
            None => -1,
            Some(deadline) => {
                let now = now_millis();
                if now >= deadline {
                    -2
                } else {
                    ((deadline - now) / 1000) as i64
                }
            }
        }
    }
}

/// Current time in milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as u64
}

/// Current time in seconds since the UNIX epoch.
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs()
}
