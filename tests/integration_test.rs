use cinnabar::config::Config;
use cinnabar::persistence::{self, aof::FsyncPolicy, Coordinator};
use cinnabar::pubsub::PubSubBus;
use cinnabar::server;
use redis::Commands;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

fn test_config(port: u16) -> Config {
    Config {
        port,
        // Keep auto-save quiet during tests
        rdb_min_changes: 1_000_000,
        ..Default::default()
    }
}

fn start_server(config: Config) -> tokio::task::JoinHandle<()> {
    let keyspace = persistence::recover(&config).expect("recovery failed");
    let mut coordinator = Coordinator::new();
    if config.aof_enabled {
        coordinator
            .aof
            .open(&config.aof_path(), FsyncPolicy::from_str(&config.aof_fsync))
            .expect("aof open failed");
    }

    let store = Arc::new(RwLock::new(keyspace));
    let pubsub = Arc::new(RwLock::new(PubSubBus::new()));
    let coord = Arc::new(Mutex::new(coordinator));

    tokio::spawn(async move {
        let _ = server::run_server(store, Arc::new(config), pubsub, coord).await;
    })
}

fn get_client(port: u16) -> redis::Connection {
    let client = redis::Client::open(format!("redis://127.0.0.1:{port}/")).unwrap();
    for i in 0..50 {
        match client.get_connection() {
            Ok(conn) => return conn,
            Err(_) if i < 49 => {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(e) => panic!("failed to connect: {e}"),
        }
    }
    unreachable!()
}

#[tokio::test]
async fn test_ping_and_echo() {
    let port = 16400;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);
        let pong: String = redis::cmd("PING").query(&mut conn).unwrap();
        assert_eq!(pong, "PONG");
        let echoed: String = redis::cmd("ECHO").arg("hello world").query(&mut conn).unwrap();
        assert_eq!(echoed, "hello world");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_set_get_del_lifecycle() {
    let port = 16401;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let _: () = conn.set("foo", "bar").unwrap();
        let value: String = conn.get("foo").unwrap();
        assert_eq!(value, "bar");

        let removed: i64 = conn.del("foo").unwrap();
        assert_eq!(removed, 1);
        let gone: Option<String> = conn.get("foo").unwrap();
        assert_eq!(gone, None);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_set_with_expiry() {
    let port = 16402;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let _: () = redis::cmd("SET")
            .arg("k")
            .arg("v")
            .arg("EX")
            .arg(1)
            .query(&mut conn)
            .unwrap();
        let ttl: i64 = conn.ttl("k").unwrap();
        assert!(ttl >= 0 && ttl <= 1);

        std::thread::sleep(std::time::Duration::from_millis(1100));

        let ttl: i64 = conn.ttl("k").unwrap();
        assert_eq!(ttl, -2);
        let gone: Option<String> = conn.get("k").unwrap();
        assert_eq!(gone, None);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_set_on_other_type_is_refused() {
    let port = 16403;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let _: i64 = conn.rpush("mylist", "x").unwrap();
        let result: redis::RedisResult<()> = conn.set("mylist", "value");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"), "got: {err}");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_hash_commands() {
    let port = 16404;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let new_fields: i64 = redis::cmd("HSET")
            .arg("h")
            .arg("f1")
            .arg("v1")
            .arg("f2")
            .arg("v2")
            .query(&mut conn)
            .unwrap();
        assert_eq!(new_fields, 2);

        let value: String = conn.hget("h", "f1").unwrap();
        assert_eq!(value, "v1");

        let mut all: Vec<String> = redis::cmd("HGETALL").arg("h").query(&mut conn).unwrap();
        all.sort();
        assert_eq!(all, vec!["f1", "f2", "v1", "v2"]);

        let removed: i64 = conn.hdel("h", "f1").unwrap();
        assert_eq!(removed, 1);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_list_commands() {
    let port = 16405;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let len: i64 = conn.rpush("l", &["a", "b", "c"]).unwrap();
        assert_eq!(len, 3);
        let len: i64 = conn.lpush("l", "z").unwrap();
        assert_eq!(len, 4);

        let range: Vec<String> = conn.lrange("l", 0, -1).unwrap();
        assert_eq!(range, vec!["z", "a", "b", "c"]);

        let popped: String = redis::cmd("LPOP").arg("l").query(&mut conn).unwrap();
        assert_eq!(popped, "z");
        let popped: String = redis::cmd("RPOP").arg("l").query(&mut conn).unwrap();
        assert_eq!(popped, "c");
        let len: i64 = conn.llen("l").unwrap();
        assert_eq!(len, 2);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_sorted_set_leaderboard() {
    let port = 16406;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let added: i64 = redis::cmd("ZADD")
            .arg("lb")
            .arg(100)
            .arg("a")
            .arg(75)
            .arg("b")
            .arg(150)
            .arg("c")
            .query(&mut conn)
            .unwrap();
        assert_eq!(added, 3);

        let range: Vec<String> = redis::cmd("ZRANGE")
            .arg("lb")
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query(&mut conn)
            .unwrap();
        assert_eq!(range, vec!["b", "75", "a", "100", "c", "150"]);

        let new_score: String = redis::cmd("ZINCRBY")
            .arg("lb")
            .arg(50)
            .arg("b")
            .query(&mut conn)
            .unwrap();
        assert_eq!(new_score, "125");

        let in_range: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg("lb")
            .arg(100)
            .arg(200)
            .query(&mut conn)
            .unwrap();
        assert_eq!(in_range, vec!["a", "b", "c"]);

        let count: i64 = redis::cmd("ZCOUNT")
            .arg("lb")
            .arg("-inf")
            .arg("+inf")
            .query(&mut conn)
            .unwrap();
        assert_eq!(count, 3);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_bitmap_commands() {
    let port = 16407;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let old: i64 = redis::cmd("SETBIT").arg("bm").arg(7).arg(1).query(&mut conn).unwrap();
        assert_eq!(old, 0);
        let bit: i64 = redis::cmd("GETBIT").arg("bm").arg(7).query(&mut conn).unwrap();
        assert_eq!(bit, 1);
        let count: i64 = redis::cmd("BITCOUNT").arg("bm").query(&mut conn).unwrap();
        assert_eq!(count, 1);

        let old: i64 = redis::cmd("SETBIT").arg("bm").arg(0).arg(1).query(&mut conn).unwrap();
        assert_eq!(old, 0);
        let pos: i64 = redis::cmd("BITPOS").arg("bm").arg(1).query(&mut conn).unwrap();
        assert_eq!(pos, 0);

        let _: i64 = redis::cmd("SETBIT").arg("other").arg(7).arg(1).query(&mut conn).unwrap();
        let len: i64 = redis::cmd("BITOP")
            .arg("AND")
            .arg("dest")
            .arg("bm")
            .arg("other")
            .query(&mut conn)
            .unwrap();
        assert_eq!(len, 1);
        let count: i64 = redis::cmd("BITCOUNT").arg("dest").query(&mut conn).unwrap();
        assert_eq!(count, 1);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_hyperloglog_estimate() {
    let port = 16408;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        for i in 0..1000 {
            let _: i64 = redis::cmd("PFADD")
                .arg("visitors")
                .arg(format!("user-{i}"))
                .query(&mut conn)
                .unwrap();
        }
        let estimate: i64 = redis::cmd("PFCOUNT").arg("visitors").query(&mut conn).unwrap();
        let error = (estimate - 1000).abs() as f64 / 1000.0;
        assert!(error < 0.05, "estimate {estimate} too far from 1000");

        for i in 0..500 {
            let _: i64 = redis::cmd("PFADD")
                .arg("other")
                .arg(format!("user-{i}"))
                .query(&mut conn)
                .unwrap();
        }
        // The union only has 1000 distinct members
        let union: i64 = redis::cmd("PFCOUNT")
            .arg("visitors")
            .arg("other")
            .query(&mut conn)
            .unwrap();
        let error = (union - 1000).abs() as f64 / 1000.0;
        assert!(error < 0.05, "union estimate {union} too far from 1000");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_multi_exec_applies_atomically() {
    let port = 16409;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let ok: String = redis::cmd("MULTI").query(&mut conn).unwrap();
        assert_eq!(ok, "OK");
        let queued: String = redis::cmd("SET").arg("a").arg("1").query(&mut conn).unwrap();
        assert_eq!(queued, "QUEUED");
        let queued: String = redis::cmd("SET").arg("b").arg("2").query(&mut conn).unwrap();
        assert_eq!(queued, "QUEUED");

        let results: Vec<String> = redis::cmd("EXEC").query(&mut conn).unwrap();
        assert_eq!(results, vec!["OK", "OK"]);

        let a: String = conn.get("a").unwrap();
        assert_eq!(a, "1");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_watch_aborts_exec_on_concurrent_write() {
    let port = 16410;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn1 = get_client(port);
        let mut conn2 = get_client(port);

        let _: () = conn1.set("k", "initial").unwrap();

        let _: String = redis::cmd("WATCH").arg("k").query(&mut conn1).unwrap();
        let _: String = redis::cmd("MULTI").query(&mut conn1).unwrap();
        let _: String = redis::cmd("SET").arg("k").arg("from-tx").query(&mut conn1).unwrap();

        // A second connection modifies the watched key before EXEC.
        let _: () = conn2.set("k", "other").unwrap();

        let result: Option<Vec<String>> = redis::cmd("EXEC").query(&mut conn1).unwrap();
        assert_eq!(result, None);

        let value: String = conn1.get("k").unwrap();
        assert_eq!(value, "other");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_pubsub_fanout() {
    let port = 16411;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut subscriber = get_client(port);
        let mut publisher = get_client(port);

        let mut pubsub = subscriber.as_pubsub();
        pubsub.subscribe("news").unwrap();

        let receivers: i64 = publisher.publish("news", "breaking").unwrap();
        assert_eq!(receivers, 1);

        let msg = pubsub.get_message().unwrap();
        assert_eq!(msg.get_channel_name(), "news");
        let payload: String = msg.get_payload().unwrap();
        assert_eq!(payload, "breaking");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_save_and_reload() {
    let port_a = 16412;
    let port_b = 16413;
    let dir = tempfile::tempdir().unwrap();

    let mut config_a = test_config(port_a);
    config_a.dir = dir.path().to_str().unwrap().to_string();
    let mut config_b = test_config(port_b);
    config_b.dir = dir.path().to_str().unwrap().to_string();

    let _server_a = start_server(config_a);

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port_a);
        let _: () = conn.set("persisted", "1").unwrap();
        let _: i64 = conn.rpush("plist", &["x", "y"]).unwrap();
        let saved: String = redis::cmd("SAVE").query(&mut conn).unwrap();
        assert_eq!(saved, "OK");
        let stamp: i64 = redis::cmd("LASTSAVE").query(&mut conn).unwrap();
        assert!(stamp > 0);
    })
    .await
    .unwrap();

    // A second server over the same directory recovers the snapshot.
    let _server_b = start_server(config_b);

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port_b);
        let value: String = conn.get("persisted").unwrap();
        assert_eq!(value, "1");
        let range: Vec<String> = conn.lrange("plist", 0, -1).unwrap();
        assert_eq!(range, vec!["x", "y"]);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_aof_replay_after_restart() {
    let port_a = 16414;
    let port_b = 16415;
    let dir = tempfile::tempdir().unwrap();

    let mut config_a = test_config(port_a);
    config_a.dir = dir.path().to_str().unwrap().to_string();
    config_a.aof_enabled = true;
    config_a.aof_fsync = "always".to_string();
    let mut config_b = config_a.clone();
    config_b.port = port_b;

    let _server_a = start_server(config_a);

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port_a);
        let _: () = conn.set("journaled", "yes").unwrap();
        let _: i64 = conn.sadd("jset", &["a", "b"]).unwrap();
        let _: i64 = conn.del("missing").unwrap();
    })
    .await
    .unwrap();

    let _server_b = start_server(config_b);

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port_b);
        let value: String = conn.get("journaled").unwrap();
        assert_eq!(value, "yes");
        let card: i64 = conn.scard("jset").unwrap();
        assert_eq!(card, 2);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_info_sections() {
    let port = 16416;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let info: String = redis::cmd("INFO").query(&mut conn).unwrap();
        for section in ["# server", "# persistence", "# stats", "# memory"] {
            assert!(info.contains(section), "missing section {section}");
        }
        assert!(info.contains("server_name:cinnabar"));

        let only_stats: String = redis::cmd("INFO").arg("stats").query(&mut conn).unwrap();
        assert!(only_stats.contains("# stats"));
        assert!(!only_stats.contains("# server"));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_unknown_command_and_arity_errors() {
    let port = 16417;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let err = redis::cmd("NOSUCHCMD").query::<()>(&mut conn).unwrap_err();
        assert!(err.to_string().contains("unknown command"), "got: {err}");

        let err = redis::cmd("GET").query::<()>(&mut conn).unwrap_err();
        assert!(
            err.to_string().contains("wrong number of arguments"),
            "got: {err}"
        );
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_sets_and_random_selection() {
    let port = 16418;
    let _server = start_server(test_config(port));

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);

        let added: i64 = conn.sadd("s", &["a", "b", "c"]).unwrap();
        assert_eq!(added, 3);

        let is_member: i64 = conn.sismember("s", "a").unwrap();
        assert_eq!(is_member, 1);

        // Negative count may repeat members
        let sampled: Vec<String> = redis::cmd("SRANDMEMBER")
            .arg("s")
            .arg(-10)
            .query(&mut conn)
            .unwrap();
        assert_eq!(sampled.len(), 10);

        let popped: Vec<String> = redis::cmd("SPOP").arg("s").arg(2).query(&mut conn).unwrap();
        assert_eq!(popped.len(), 2);
        let card: i64 = conn.scard("s").unwrap();
        assert_eq!(card, 1);

        let members: Vec<String> = conn.smembers("s").unwrap();
        let remaining = members[0].clone();
        let moved: i64 = redis::cmd("SMOVE")
            .arg("s")
            .arg("s2")
            .arg(&remaining)
            .query(&mut conn)
            .unwrap();
        assert_eq!(moved, 1);
        let card: i64 = conn.scard("s2").unwrap();
        assert_eq!(card, 1);
        let exists: i64 = conn.exists("s").unwrap();
        assert_eq!(exists, 0, "emptied source set should be deleted");
    })
    .await
    .unwrap();
}
