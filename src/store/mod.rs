pub mod entry;

use crate::types::Value;
use entry::{now_millis, Entry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The shared keyspace: binary-safe keys mapped to typed entries.
///
/// Every mutating accessor bumps the key's revision counter, which is
/// what WATCH snapshots and EXEC compares — deletions and expirations
/// (lazy or sweep) count as modifications.
#[derive(Debug, Clone)]
pub struct Keyspace {
    data: HashMap<Vec<u8>, Entry>,
    /// Per-key revision, assigned from a monotonically increasing sequence.
    revisions: HashMap<Vec<u8>, u64>,
    revision_seq: u64,
    /// Changes since the last successful snapshot.
    pub dirty: u64,
    /// Total keys removed through expiration.
    pub expired_keys: u64,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Keyspace {
            data: HashMap::with_capacity(capacity),
            revisions: HashMap::new(),
            revision_seq: 0,
            dirty: 0,
            expired_keys: 0,
        }
    }

    /// Bump the revision of a key.
    pub fn touch(&mut self, key: &[u8]) {
        self.revision_seq += 1;
        self.revisions.insert(key.to_vec(), self.revision_seq);
    }

    /// Current revision of a key (0 if never written).
    pub fn revision(&self, key: &[u8]) -> u64 {
        self.revisions.get(key).copied().unwrap_or(0)
    }

    /// Get an entry, performing lazy expiration first.
    pub fn get(&mut self, key: &[u8]) -> Option<&Entry> {
        if self.expire_if_due(key) {
            return None;
        }
        self.data.get(key)
    }

    /// Get a mutable entry, performing lazy expiration first. The
    /// revision is bumped because callers use this to mutate.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        if self.expire_if_due(key) {
            return None;
        }
        if self.data.contains_key(key) {
            self.touch(key);
        }
        self.data.get_mut(key)
    }

    /// Read-only view that elides expired entries without removing
    /// them. Multi-key reads use this to hold several references at
    /// once; removal is left to the lazy path and the sweep.
    pub fn peek(&self, key: &[u8]) -> Option<&Entry> {
        let entry = self.data.get(key)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry)
        }
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, key: Vec<u8>, entry: Entry) {
        self.touch(&key);
        self.data.insert(key, entry);
    }

    /// Delete a key. Returns true if it existed.
    pub fn del(&mut self, key: &[u8]) -> bool {
        if self.data.remove(key).is_some() {
            self.touch(key);
            true
        } else {
            false
        }
    }

    /// Check if a key exists (with lazy expiration).
    pub fn exists(&mut self, key: &[u8]) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        self.data.contains_key(key)
    }

    /// Set the expiration deadline on a key. Returns true if the key exists.
    pub fn set_deadline(&mut self, key: &[u8], at_millis: u64) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        if let Some(entry) = self.data.get_mut(key) {
            entry.expires_at = Some(at_millis);
            self.touch(key);
            true
        } else {
            false
        }
    }

    /// Number of live entries (entries past their deadline but not yet
    /// removed are still counted).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of keys carrying a deadline.
    pub fn expires_count(&self) -> usize {
        self.data
            .values()
            .filter(|e| e.expires_at.is_some())
            .count()
    }

    /// Remove every entry whose deadline has passed, returning the
    /// removed keys so the caller can synthesize DEL records.
    pub fn sweep_expired(&mut self) -> Vec<Vec<u8>> {
        let now = now_millis();
        let expired: Vec<Vec<u8>> = self
            .data
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some_and(|deadline| now >= deadline))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.data.remove(key);
            self.touch(key);
        }
        self.expired_keys += expired.len() as u64;
        expired
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Entry)> {
        self.data.iter()
    }

    /// Rough memory footprint of the keyspace in bytes.
    pub fn estimated_memory(&self) -> usize {
        let mut total = 0usize;
        for (key, entry) in &self.data {
            total += key.len();
            // Entry overhead (struct + Option<u64>)
            total += 48;
            total += match &entry.value {
                Value::String(s) => s.len(),
                Value::List(l) => {
                    let element_bytes: usize = l.iter().map(|v| v.len()).sum();
                    64 * l.len() + element_bytes
                }
                Value::Hash(h) => {
                    let field_bytes: usize = h.iter().map(|(k, v)| k.len() + v.len()).sum();
                    96 * h.len() + field_bytes
                }
                Value::Set(s) => {
                    let member_bytes: usize = s.iter().map(|m| m.len()).sum();
                    64 * s.len() + member_bytes
                }
                Value::SortedSet(z) => {
                    let member_bytes: usize = z.iter().map(|(m, _)| m.len()).sum();
                    96 * z.len() + member_bytes
                }
            };
        }
        total
    }

    /// Remove the key if its deadline has passed. Returns true if the
    /// key was removed here.
    fn expire_if_due(&mut self, key: &[u8]) -> bool {
        let due = self
            .data
            .get(key)
            .is_some_and(|entry| entry.is_expired());
        if due {
            self.data.remove(key);
            self.touch(key);
            self.expired_keys += 1;
        }
        due
    }
}

pub type SharedKeyspace = Arc<RwLock<Keyspace>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::string::StringValue;

    fn string_entry(data: &[u8]) -> Entry {
        Entry::new(Value::String(StringValue::new(data.to_vec())))
    }

    #[test]
    fn test_set_get_del() {
        let mut ks = Keyspace::new();
        ks.set(b"k".to_vec(), string_entry(b"v"));
        assert!(ks.exists(b"k"));
        assert!(ks.del(b"k"));
        assert!(!ks.del(b"k"));
        assert!(ks.get(b"k").is_none());
    }

    #[test]
    fn test_past_deadline_reads_as_missing() {
        let mut ks = Keyspace::new();
        ks.set(b"k".to_vec(), string_entry(b"v"));
        ks.set_deadline(b"k", now_millis().saturating_sub(10));
        assert!(ks.get(b"k").is_none());
        assert_eq!(ks.expired_keys, 1);
        // The record is gone, not just hidden
        assert_eq!(ks.len(), 0);
    }

    #[test]
    fn test_future_deadline_still_readable() {
        let mut ks = Keyspace::new();
        ks.set(b"k".to_vec(), string_entry(b"v"));
        ks.set_deadline(b"k", now_millis() + 60_000);
        assert!(ks.get(b"k").is_some());
        let ttl = ks.get(b"k").unwrap().ttl_seconds();
        assert!((0..=60).contains(&ttl));
    }

    #[test]
    fn test_sweep_returns_removed_keys() {
        let mut ks = Keyspace::new();
        ks.set(b"a".to_vec(), string_entry(b"1"));
        ks.set(b"b".to_vec(), string_entry(b"2"));
        ks.set(b"c".to_vec(), string_entry(b"3"));
        ks.set_deadline(b"a", now_millis().saturating_sub(5));
        ks.set_deadline(b"b", now_millis().saturating_sub(5));

        let mut removed = ks.sweep_expired();
        removed.sort();
        assert_eq!(removed, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.expired_keys, 2);
    }

    #[test]
    fn test_revision_bumps_on_writes_and_deletes() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.revision(b"k"), 0);

        ks.set(b"k".to_vec(), string_entry(b"v"));
        let after_set = ks.revision(b"k");
        assert!(after_set > 0);

        ks.get(b"k");
        assert_eq!(ks.revision(b"k"), after_set, "reads must not bump");

        ks.get_mut(b"k");
        let after_mut = ks.revision(b"k");
        assert!(after_mut > after_set);

        ks.del(b"k");
        assert!(ks.revision(b"k") > after_mut, "deletion is a modification");
    }

    #[test]
    fn test_lazy_expiry_bumps_revision() {
        let mut ks = Keyspace::new();
        ks.set(b"k".to_vec(), string_entry(b"v"));
        ks.set_deadline(b"k", now_millis().saturating_sub(1));
        let before = ks.revision(b"k");
        assert!(ks.get(b"k").is_none());
        assert!(ks.revision(b"k") > before);
    }
}
