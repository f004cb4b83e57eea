use crate::command::{self, CommandContext};
use crate::config::Config;
use crate::connection::ClientState;
use crate::error::{CinnabarError, CinnabarResult};
use crate::pubsub::PubSubBus;
use crate::resp::RespValue;
use crate::server::ServerStats;
use crate::store::Keyspace;
use crate::types::Value;
use std::io::{self, BufRead, Read, Write};

/// Append-only file writer. Owned by the persistence coordinator;
/// appends happen on the dispatch path, fsync may happen on a timer.
pub struct AofWriter {
    file: Option<std::fs::File>,
    path: Option<String>,
    fsync_policy: FsyncPolicy,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every appended command.
    Always,
    /// fsync once per second from a timer task.
    Everysec,
    /// Leave flushing to the OS.
    No,
}

impl FsyncPolicy {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s {
            "always" => FsyncPolicy::Always,
            "everysec" => FsyncPolicy::Everysec,
            _ => FsyncPolicy::No,
        }
    }
}

impl Default for AofWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AofWriter {
    pub fn new() -> Self {
        AofWriter {
            file: None,
            path: None,
            fsync_policy: FsyncPolicy::Everysec,
        }
    }

    /// Open or create the append-only file.
    pub fn open(&mut self, path: &str, policy: FsyncPolicy) -> io::Result<()> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        self.file = Some(file);
        self.path = Some(path.to_string());
        self.fsync_policy = policy;
        Ok(())
    }

    /// Append one command as a RESP array.
    pub fn append(&mut self, cmd_name: &str, args: &[RespValue]) -> io::Result<()> {
        let file = match &mut self.file {
            Some(f) => f,
            None => return Ok(()),
        };

        let mut items = Vec::with_capacity(1 + args.len());
        items.push(RespValue::bulk_string(cmd_name.as_bytes().to_vec()));
        for arg in args {
            items.push(arg.clone());
        }
        file.write_all(&RespValue::array(items).serialize())?;

        if self.fsync_policy == FsyncPolicy::Always {
            file.sync_data()?;
        }

        Ok(())
    }

    /// Push buffered data to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        if let Some(f) = &mut self.file {
            f.sync_data()?;
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.file.is_some()
    }

    pub fn fsync_policy(&self) -> FsyncPolicy {
        self.fsync_policy
    }

    /// Current size of the live file in bytes.
    pub fn size(&self) -> u64 {
        self.file
            .as_ref()
            .and_then(|f| f.metadata().ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Reopen the live file after a rewrite renamed a fresh log over it.
    pub fn reopen(&mut self) -> io::Result<()> {
        if let Some(path) = self.path.clone() {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            self.file = Some(file);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(f) = self.file.take() {
            let _ = f.sync_all();
        }
    }
}

/// Replay an append-only file into a keyspace by feeding every logged
/// command through the normal dispatcher with logging disabled. Returns
/// the number of commands applied; any malformed frame aborts the
/// replay.
pub fn replay(path: &str, ks: &mut Keyspace, config: &Config) -> CinnabarResult<usize> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);

    let mut pubsub = PubSubBus::new();
    let mut coord = super::Coordinator::new(); // AOF inactive: replay never re-logs
    let stats = ServerStats::new();
    let mut client = ClientState::detached();
    let mut applied = 0usize;

    loop {
        let frame = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => return Err(CinnabarError::CorruptAof(e.to_string())),
        };

        let items = match frame {
            RespValue::Array(Some(items)) if !items.is_empty() => items,
            _ => {
                return Err(CinnabarError::CorruptAof(
                    "expected a command array".to_string(),
                ))
            }
        };

        let cmd_name = match items[0].to_string_lossy() {
            Some(s) => s.to_uppercase(),
            None => {
                return Err(CinnabarError::CorruptAof(
                    "command name is not a string".to_string(),
                ))
            }
        };

        let mut ctx = CommandContext {
            ks: &mut *ks,
            pubsub: &mut pubsub,
            coord: &mut coord,
            config,
            stats: &stats,
            client: &mut client,
        };
        command::execute(&mut ctx, &cmd_name, &items[1..]);
        applied += 1;
    }

    Ok(applied)
}

/// Rewrite the log from the current keyspace state: the minimal command
/// sequence that reproduces it, plus absolute-deadline entries for keys
/// with a TTL. Writes a sibling temp file and renames it over the live
/// log.
pub fn rewrite(ks: &Keyspace, path: &str) -> io::Result<()> {
    let tmp_path = format!("{path}.tmp");
    let mut file = std::fs::File::create(&tmp_path)?;

    for (key, entry) in ks.iter() {
        if entry.is_expired() {
            continue;
        }

        match &entry.value {
            Value::String(s) => {
                write_command(&mut file, &[b"SET", key, s.as_bytes()])?;
            }
            Value::List(list) => {
                if !list.is_empty() {
                    let mut parts: Vec<&[u8]> = vec![b"RPUSH", key];
                    parts.extend(list.iter().map(|v| v.as_slice()));
                    write_command(&mut file, &parts)?;
                }
            }
            Value::Hash(hash) => {
                if !hash.is_empty() {
                    let mut parts: Vec<&[u8]> = vec![b"HSET", key];
                    for (field, value) in hash.iter() {
                        parts.push(field);
                        parts.push(value);
                    }
                    write_command(&mut file, &parts)?;
                }
            }
            Value::Set(set) => {
                if !set.is_empty() {
                    let mut parts: Vec<&[u8]> = vec![b"SADD", key];
                    parts.extend(set.iter().map(|v| v.as_slice()));
                    write_command(&mut file, &parts)?;
                }
            }
            Value::SortedSet(zset) => {
                if !zset.is_empty() {
                    let scores: Vec<String> = zset
                        .iter()
                        .map(|(_, score)| crate::types::sorted_set::format_score(score))
                        .collect();
                    let mut parts: Vec<&[u8]> = vec![b"ZADD", key];
                    for ((member, _), score) in zset.iter().zip(scores.iter()) {
                        parts.push(score.as_bytes());
                        parts.push(member);
                    }
                    write_command(&mut file, &parts)?;
                }
            }
        }

        if let Some(deadline_ms) = entry.expires_at {
            // Round the deadline up so replay never expires early.
            let deadline_secs = (deadline_ms + 999) / 1000;
            let secs = deadline_secs.to_string();
            write_command(&mut file, &[b"EXPIREAT", key, secs.as_bytes()])?;
        }
    }

    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_command(w: &mut impl Write, parts: &[&[u8]]) -> io::Result<()> {
    let items: Vec<RespValue> = parts
        .iter()
        .map(|p| RespValue::bulk_string(p.to_vec()))
        .collect();
    w.write_all(&RespValue::array(items).serialize())
}

/// Read one RESP frame from a buffered reader. `Ok(None)` at a clean
/// end of file; truncated frames are errors.
fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Option<RespValue>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    let line = line.trim_end_matches("\r\n").trim_end_matches('\n');

    if line.is_empty() {
        return Ok(None);
    }

    let first = line.as_bytes()[0];
    let rest = &line[1..];

    match first {
        b'+' => Ok(Some(RespValue::SimpleString(rest.to_string()))),
        b'-' => Ok(Some(RespValue::Error(rest.to_string()))),
        b':' => {
            let n: i64 = rest
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad integer"))?;
            Ok(Some(RespValue::Integer(n)))
        }
        b'$' => {
            let len: i64 = rest
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad bulk length"))?;
            if len == -1 {
                return Ok(Some(RespValue::null_bulk_string()));
            }
            let len = len as usize;
            let mut buf = vec![0u8; len + 2]; // payload + \r\n
            reader.read_exact(&mut buf)?;
            buf.truncate(len);
            Ok(Some(RespValue::BulkString(Some(buf))))
        }
        b'*' => {
            let count: i64 = rest
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad array length"))?;
            if count == -1 {
                return Ok(Some(RespValue::null_array()));
            }
            let count = count as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                match read_frame(reader)? {
                    Some(v) => items.push(v),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "truncated array",
                        ));
                    }
                }
            }
            Ok(Some(RespValue::Array(Some(items))))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame byte: {first}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::{now_millis, Entry};
    use crate::types::hash::HashValue;
    use crate::types::sorted_set::SortedSetValue;
    use crate::types::string::StringValue;

    #[test]
    fn test_append_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        let path = path.to_str().unwrap();

        let mut writer = AofWriter::new();
        writer.open(path, FsyncPolicy::Always).unwrap();
        writer
            .append(
                "SET",
                &[
                    RespValue::bulk_string(b"k".to_vec()),
                    RespValue::bulk_string(b"v".to_vec()),
                ],
            )
            .unwrap();
        writer
            .append(
                "LPUSH",
                &[
                    RespValue::bulk_string(b"l".to_vec()),
                    RespValue::bulk_string(b"x".to_vec()),
                ],
            )
            .unwrap();
        writer
            .append("DEL", &[RespValue::bulk_string(b"k".to_vec())])
            .unwrap();
        writer.close();

        let mut ks = Keyspace::new();
        let config = Config::default();
        let applied = replay(path, &mut ks, &config).unwrap();
        assert_eq!(applied, 3);
        assert!(!ks.exists(b"k"));
        match &ks.get(b"l").unwrap().value {
            Value::List(l) => assert_eq!(l.len(), 1),
            other => panic!("wrong type: {}", other.type_name()),
        }
    }

    #[test]
    fn test_replay_garbage_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        std::fs::write(&path, b"this is not resp\r\n").unwrap();

        let mut ks = Keyspace::new();
        let config = Config::default();
        assert!(replay(path.to_str().unwrap(), &mut ks, &config).is_err());
    }

    #[test]
    fn test_replay_truncated_frame_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        // An array header promising more elements than the file holds
        std::fs::write(&path, b"*2\r\n$3\r\nSET\r\n").unwrap();

        let mut ks = Keyspace::new();
        let config = Config::default();
        assert!(replay(path.to_str().unwrap(), &mut ks, &config).is_err());
    }

    #[test]
    fn test_rewrite_then_replay_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        let path = path.to_str().unwrap();

        let mut source = Keyspace::new();
        source.set(
            b"s".to_vec(),
            Entry::new(Value::String(StringValue::new(b"payload".to_vec()))),
        );
        let mut hash = HashValue::new();
        hash.set(b"f1".to_vec(), b"v1".to_vec());
        hash.set(b"f2".to_vec(), b"v2".to_vec());
        source.set(b"h".to_vec(), Entry::new(Value::Hash(hash)));
        let mut zset = SortedSetValue::new();
        zset.add(b"a".to_vec(), 1.5);
        zset.add(b"b".to_vec(), 2.0);
        source.set(b"z".to_vec(), Entry::new(Value::SortedSet(zset)));
        source.set(
            b"expiring".to_vec(),
            Entry::new(Value::String(StringValue::new(b"x".to_vec()))),
        );
        source.set_deadline(b"expiring", now_millis() + 120_000);

        rewrite(&source, path).unwrap();

        let mut restored = Keyspace::new();
        let config = Config::default();
        replay(path, &mut restored, &config).unwrap();

        match &restored.get(b"s").unwrap().value {
            Value::String(s) => assert_eq!(s.as_bytes(), b"payload"),
            other => panic!("wrong type: {}", other.type_name()),
        }
        match &restored.get(b"h").unwrap().value {
            Value::Hash(h) => {
                assert_eq!(h.len(), 2);
                assert_eq!(h.get(b"f1"), Some(&b"v1".to_vec()));
            }
            other => panic!("wrong type: {}", other.type_name()),
        }
        match &restored.get(b"z").unwrap().value {
            Value::SortedSet(z) => {
                assert_eq!(z.score(b"a"), Some(1.5));
                assert_eq!(z.score(b"b"), Some(2.0));
            }
            other => panic!("wrong type: {}", other.type_name()),
        }
        let ttl = restored.get(b"expiring").unwrap().ttl_seconds();
        assert!(ttl > 0, "deadline must survive the rewrite, got {ttl}");
    }
}
