use std::sync::Arc;

/// Server configuration, assembled at startup from command-line flags.
/// Nothing here changes after the server starts, so it is shared as a
/// plain `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads. 0 means "use available parallelism".
    pub workers: usize,
    pub max_connections: usize,
    pub backlog: u32,
    /// Directory holding the snapshot and append-only files.
    pub dir: String,
    // Snapshot (RDB)
    pub rdb_enabled: bool,
    pub rdb_filename: String,
    pub rdb_save_seconds: u64,
    pub rdb_min_changes: u64,
    // Append-only file
    pub aof_enabled: bool,
    pub aof_filename: String,
    pub aof_fsync: String,
    pub aof_rewrite_seconds: u64,
    pub aof_rewrite_min_bytes: u64,
    // Storage hints
    pub max_value_bytes: usize,
    pub keys_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 6380,
            workers: 0,
            max_connections: 10_000,
            backlog: 511,
            dir: ".".to_string(),
            rdb_enabled: true,
            rdb_filename: "dump.crdb".to_string(),
            rdb_save_seconds: 300,
            rdb_min_changes: 100,
            aof_enabled: false,
            aof_filename: "appendonly.aof".to_string(),
            aof_fsync: "everysec".to_string(),
            aof_rewrite_seconds: 3600,
            aof_rewrite_min_bytes: 64 * 1024 * 1024,
            max_value_bytes: 512 * 1024 * 1024,
            keys_capacity: 1024,
        }
    }
}

impl Config {
    /// Build a config from `--flag value` pairs. Unknown flags are
    /// ignored; recognized flags override the defaults.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--host", Some(v)) => config.host = v.clone(),
                ("--port", Some(v)) => {
                    if let Ok(p) = v.parse() {
                        config.port = p;
                    }
                }
                ("--workers", Some(v)) => {
                    if let Ok(w) = v.parse() {
                        config.workers = w;
                    }
                }
                ("--max-connections", Some(v)) => {
                    if let Ok(m) = v.parse() {
                        config.max_connections = m;
                    }
                }
                ("--backlog", Some(v)) => {
                    if let Ok(b) = v.parse() {
                        config.backlog = b;
                    }
                }
                ("--dir", Some(v)) => config.dir = v.clone(),
                ("--rdb-enabled", Some(v)) => config.rdb_enabled = v == "yes",
                ("--rdb-filename", Some(v)) => config.rdb_filename = v.clone(),
                ("--rdb-save-seconds", Some(v)) => {
                    if let Ok(s) = v.parse() {
                        config.rdb_save_seconds = s;
                    }
                }
                ("--rdb-min-changes", Some(v)) => {
                    if let Ok(c) = v.parse() {
                        config.rdb_min_changes = c;
                    }
                }
                ("--aof-enabled", Some(v)) => config.aof_enabled = v == "yes",
                ("--aof-filename", Some(v)) => config.aof_filename = v.clone(),
                ("--aof-fsync", Some(v)) => config.aof_fsync = v.clone(),
                ("--aof-rewrite-seconds", Some(v)) => {
                    if let Ok(s) = v.parse() {
                        config.aof_rewrite_seconds = s;
                    }
                }
                ("--aof-rewrite-min-bytes", Some(v)) => {
                    if let Ok(b) = v.parse() {
                        config.aof_rewrite_min_bytes = b;
                    }
                }
                ("--max-value-bytes", Some(v)) => {
                    if let Ok(b) = v.parse() {
                        config.max_value_bytes = b;
                    }
                }
                ("--keys-capacity", Some(v)) => {
                    if let Ok(c) = v.parse() {
                        config.keys_capacity = c;
                    }
                }
                _ => {}
            }
            i += 2;
        }
        config
    }

    pub fn rdb_path(&self) -> String {
        format!("{}/{}", self.dir, self.rdb_filename)
    }

    pub fn aof_path(&self) -> String {
        format!("{}/{}", self.dir, self.aof_filename)
    }
}

pub type SharedConfig = Arc<Config>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 6380);
        assert!(config.rdb_enabled);
        assert!(!config.aof_enabled);
    }

    #[test]
    fn test_from_args_overrides() {
        let args: Vec<String> = [
            "--port", "7000", "--dir", "/tmp/data", "--aof-enabled", "yes",
            "--rdb-min-changes", "5",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let config = Config::from_args(&args);
        assert_eq!(config.port, 7000);
        assert_eq!(config.dir, "/tmp/data");
        assert!(config.aof_enabled);
        assert_eq!(config.rdb_min_changes, 5);
        assert_eq!(config.rdb_path(), "/tmp/data/dump.crdb");
    }

    #[test]
    fn test_unknown_flags_ignored() {
        let args: Vec<String> = ["--no-such-flag", "1", "--port", "7001"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = Config::from_args(&args);
        assert_eq!(config.port, 7001);
    }
}
