pub mod bitmap;
pub mod hash;
pub mod hyperloglog;
pub mod key;
pub mod list;
pub mod pubsub;
pub mod server_cmd;
pub mod set;
pub mod sorted_set;
pub mod string;
pub mod transaction;

use crate::config::{Config, SharedConfig};
use crate::connection::ClientState;
use crate::persistence::{self, Coordinator, SharedCoordinator};
use crate::pubsub::{PubSubBus, SharedPubSub};
use crate::resp::RespValue;
use crate::server::ServerStats;
use crate::store::entry::now_seconds;
use crate::store::{Keyspace, SharedKeyspace};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Arity bounds and write classification for one command.
/// `max_args` of -1 means unbounded.
pub struct CommandSpec {
    pub min_args: usize,
    pub max_args: i64,
    pub write: bool,
}

impl CommandSpec {
    pub fn accepts(&self, arg_count: usize) -> bool {
        arg_count >= self.min_args && (self.max_args < 0 || arg_count <= self.max_args as usize)
    }
}

/// The command table. Backs queue-time validation for transactions,
/// write classification for the append-only log, and unknown-command
/// detection.
pub fn lookup(cmd_name: &str) -> Option<CommandSpec> {
    let spec = |min_args: usize, max_args: i64, write: bool| {
        Some(CommandSpec {
            min_args,
            max_args,
            write,
        })
    };
    match cmd_name {
        "PING" => spec(0, 1, false),
        "ECHO" => spec(1, 1, false),
        "QUIT" => spec(0, 0, false),
        // Strings / keys
        "SET" => spec(2, 4, true),
        "GET" => spec(1, 1, false),
        "DEL" => spec(1, -1, true),
        "EXISTS" => spec(1, 1, false),
        "EXPIRE" => spec(2, 2, true),
        "EXPIREAT" => spec(2, 2, true),
        "TTL" => spec(1, 1, false),
        // Hashes
        "HSET" => spec(3, -1, true),
        "HGET" => spec(2, 2, false),
        "HDEL" => spec(2, -1, true),
        "HKEYS" => spec(1, 1, false),
        "HVALS" => spec(1, 1, false),
        "HGETALL" => spec(1, 1, false),
        // Lists
        "LPUSH" => spec(2, -1, true),
        "RPUSH" => spec(2, -1, true),
        "LPOP" => spec(1, 1, true),
        "RPOP" => spec(1, 1, true),
        "LLEN" => spec(1, 1, false),
        "LRANGE" => spec(3, 3, false),
        // Sets
        "SADD" => spec(2, -1, true),
        "SREM" => spec(2, -1, true),
        "SCARD" => spec(1, 1, false),
        "SMEMBERS" => spec(1, 1, false),
        "SISMEMBER" => spec(2, 2, false),
        "SMOVE" => spec(3, 3, true),
        "SPOP" => spec(1, 2, true),
        "SRANDMEMBER" => spec(1, 2, false),
        "SINTER" => spec(1, -1, false),
        "SUNION" => spec(1, -1, false),
        "SDIFF" => spec(1, -1, false),
        // Sorted sets
        "ZADD" => spec(3, -1, true),
        "ZREM" => spec(2, -1, true),
        "ZCARD" => spec(1, 1, false),
        "ZCOUNT" => spec(3, 3, false),
        "ZSCORE" => spec(2, 2, false),
        "ZINCRBY" => spec(3, 3, true),
        "ZRANGE" => spec(3, 4, false),
        "ZREVRANGE" => spec(3, 4, false),
        "ZRANGEBYSCORE" => spec(3, 4, false),
        // Bitmaps
        "GETBIT" => spec(2, 2, false),
        "SETBIT" => spec(3, 3, true),
        "BITCOUNT" => spec(1, 3, false),
        "BITOP" => spec(3, -1, true),
        "BITPOS" => spec(2, 4, false),
        // HyperLogLog
        "PFADD" => spec(1, -1, true),
        "PFCOUNT" => spec(1, -1, false),
        "PFMERGE" => spec(2, -1, true),
        // Pub/sub
        "SUBSCRIBE" => spec(1, -1, false),
        "UNSUBSCRIBE" => spec(0, -1, false),
        "PUBLISH" => spec(2, 2, false),
        "PUBSUB" => spec(1, -1, false),
        // Transactions
        "MULTI" => spec(0, 0, false),
        "EXEC" => spec(0, 0, false),
        "DISCARD" => spec(0, 0, false),
        "WATCH" => spec(1, -1, false),
        "UNWATCH" => spec(0, 0, false),
        // Admin
        "SAVE" => spec(0, 0, false),
        "BGSAVE" => spec(0, 0, false),
        "LASTSAVE" => spec(0, 0, false),
        "INFO" => spec(0, 1, false),
        "SHUTDOWN" => spec(0, 1, false),
        _ => None,
    }
}

pub fn is_write_command(cmd_name: &str) -> bool {
    lookup(cmd_name).is_some_and(|spec| spec.write)
}

/// Everything a command handler may touch. The dispatcher builds one of
/// these under the shared locks; handlers are synchronous and never
/// suspend, so a whole EXEC batch runs without interleaving.
pub struct CommandContext<'a> {
    pub ks: &'a mut Keyspace,
    pub pubsub: &'a mut PubSubBus,
    pub coord: &'a mut Coordinator,
    pub config: &'a Config,
    pub stats: &'a ServerStats,
    pub client: &'a mut ClientState,
}

/// Dispatch one parsed command: queue it when a transaction is open,
/// otherwise take the shared locks and run it.
pub async fn dispatch(
    cmd_name: &str,
    args: &[RespValue],
    store: &SharedKeyspace,
    pubsub: &SharedPubSub,
    coord: &SharedCoordinator,
    config: &SharedConfig,
    stats: &Arc<ServerStats>,
    client: &mut ClientState,
) -> RespValue {
    stats.commands_processed.fetch_add(1, Ordering::Relaxed);

    if client.in_multi && !matches!(cmd_name, "MULTI" | "EXEC" | "DISCARD" | "WATCH" | "UNWATCH") {
        return transaction::queue_command(client, cmd_name, args);
    }

    // Lock order everywhere: keyspace, pub/sub bus, coordinator.
    let mut ks = store.write().await;
    let mut bus = pubsub.write().await;
    let mut co = coord.lock().await;

    let reply = if bus.subscription_count(client.id) > 0
        && !matches!(cmd_name, "SUBSCRIBE" | "UNSUBSCRIBE" | "PING" | "QUIT")
    {
        RespValue::error(format!(
            "ERR Can't execute '{cmd_name}': only SUBSCRIBE / UNSUBSCRIBE / PING / QUIT are allowed in this context"
        ))
    } else {
        let mut ctx = CommandContext {
            ks: &mut ks,
            pubsub: &mut bus,
            coord: &mut co,
            config: config.as_ref(),
            stats: stats.as_ref(),
            client,
        };
        execute(&mut ctx, cmd_name, args)
    };

    // A BGSAVE handler stages its point-in-time clone; the actual file
    // write starts once the locks are released.
    let pending = co.pending_bgsave.take();
    drop(co);
    drop(bus);
    drop(ks);

    if let Some(snapshot) = pending {
        persistence::spawn_background_save(
            store.clone(),
            coord.clone(),
            config.rdb_path(),
            snapshot,
        );
    }

    reply
}

/// Run one command against the locked state. This is the single
/// execution path: EXEC iterates its queue through here, and AOF replay
/// feeds logged commands through here with logging disabled.
pub fn execute(ctx: &mut CommandContext, cmd_name: &str, args: &[RespValue]) -> RespValue {
    if is_write_command(cmd_name) {
        for (log_name, log_args) in aof_form(cmd_name, args) {
            ctx.coord.log_write(&log_name, &log_args);
        }
        ctx.ks.dirty += 1;
    }

    match cmd_name {
        "PING" => server_cmd::ping(args),
        "ECHO" => server_cmd::echo(args),
        "QUIT" => server_cmd::quit(ctx.client),

        "SET" => string::set(args, ctx.ks, ctx.config),
        "GET" => string::get(args, ctx.ks),

        "DEL" => key::del(args, ctx.ks),
        "EXISTS" => key::exists(args, ctx.ks),
        "EXPIRE" => key::expire(args, ctx.ks),
        "EXPIREAT" => key::expire_at(args, ctx.ks),
        "TTL" => key::ttl(args, ctx.ks),

        "HSET" => hash::hset(args, ctx.ks),
        "HGET" => hash::hget(args, ctx.ks),
        "HDEL" => hash::hdel(args, ctx.ks),
        "HKEYS" => hash::hkeys(args, ctx.ks),
        "HVALS" => hash::hvals(args, ctx.ks),
        "HGETALL" => hash::hgetall(args, ctx.ks),

        "LPUSH" => list::lpush(args, ctx.ks),
        "RPUSH" => list::rpush(args, ctx.ks),
        "LPOP" => list::lpop(args, ctx.ks),
        "RPOP" => list::rpop(args, ctx.ks),
        "LLEN" => list::llen(args, ctx.ks),
        "LRANGE" => list::lrange(args, ctx.ks),

        "SADD" => set::sadd(args, ctx.ks),
        "SREM" => set::srem(args, ctx.ks),
        "SCARD" => set::scard(args, ctx.ks),
        "SMEMBERS" => set::smembers(args, ctx.ks),
        "SISMEMBER" => set::sismember(args, ctx.ks),
        "SMOVE" => set::smove(args, ctx.ks),
        "SPOP" => set::spop(args, ctx.ks),
        "SRANDMEMBER" => set::srandmember(args, ctx.ks),
        "SINTER" => set::sinter(args, ctx.ks),
        "SUNION" => set::sunion(args, ctx.ks),
        "SDIFF" => set::sdiff(args, ctx.ks),

        "ZADD" => sorted_set::zadd(args, ctx.ks),
        "ZREM" => sorted_set::zrem(args, ctx.ks),
        "ZCARD" => sorted_set::zcard(args, ctx.ks),
        "ZCOUNT" => sorted_set::zcount(args, ctx.ks),
        "ZSCORE" => sorted_set::zscore(args, ctx.ks),
        "ZINCRBY" => sorted_set::zincrby(args, ctx.ks),
        "ZRANGE" => sorted_set::zrange(args, ctx.ks),
        "ZREVRANGE" => sorted_set::zrevrange(args, ctx.ks),
        "ZRANGEBYSCORE" => sorted_set::zrangebyscore(args, ctx.ks),

        "SETBIT" => bitmap::setbit(args, ctx.ks, ctx.config),
        "GETBIT" => bitmap::getbit(args, ctx.ks),
        "BITCOUNT" => bitmap::bitcount(args, ctx.ks),
        "BITOP" => bitmap::bitop(args, ctx.ks),
        "BITPOS" => bitmap::bitpos(args, ctx.ks),

        "PFADD" => hyperloglog::pfadd(args, ctx.ks),
        "PFCOUNT" => hyperloglog::pfcount(args, ctx.ks),
        "PFMERGE" => hyperloglog::pfmerge(args, ctx.ks),

        "SUBSCRIBE" => pubsub::subscribe(args, ctx.client, ctx.pubsub),
        "UNSUBSCRIBE" => pubsub::unsubscribe(args, ctx.client, ctx.pubsub),
        "PUBLISH" => pubsub::publish(args, ctx.pubsub),
        "PUBSUB" => pubsub::pubsub(args, ctx.pubsub),

        "MULTI" => transaction::multi(ctx.client),
        "EXEC" => transaction::exec(ctx),
        "DISCARD" => transaction::discard(ctx.client),
        "WATCH" => transaction::watch(args, ctx.ks, ctx.client),
        "UNWATCH" => transaction::unwatch(ctx.client),

        "SAVE" => server_cmd::save(ctx),
        "BGSAVE" => server_cmd::bgsave(ctx),
        "LASTSAVE" => server_cmd::lastsave(ctx),
        "INFO" => server_cmd::info(args, ctx),
        "SHUTDOWN" => server_cmd::shutdown(args, ctx.client),

        _ => RespValue::error(format!("ERR unknown command '{cmd_name}'")),
    }
}

/// The form a write command takes in the append-only log. Relative
/// deadlines are rewritten to absolute ones so a later replay lands on
/// the same deadline.
fn aof_form(cmd_name: &str, args: &[RespValue]) -> Vec<(String, Vec<RespValue>)> {
    match cmd_name {
        "EXPIRE" if args.len() == 2 => {
            if let Some(secs) = arg_to_i64(&args[1]) {
                let at = now_seconds() as i64 + secs;
                return vec![(
                    "EXPIREAT".to_string(),
                    vec![
                        args[0].clone(),
                        RespValue::bulk_string(at.to_string().into_bytes()),
                    ],
                )];
            }
        }
        "SET" if args.len() == 4 => {
            let opt = arg_to_string(&args[2]);
            let secs = arg_to_i64(&args[3]);
            if let (Some(opt), Some(secs)) = (opt, secs) {
                if opt.eq_ignore_ascii_case("EX") && secs > 0 {
                    let at = now_seconds() as i64 + secs;
                    return vec![
                        (
                            "SET".to_string(),
                            vec![args[0].clone(), args[1].clone()],
                        ),
                        (
                            "EXPIREAT".to_string(),
                            vec![
                                args[0].clone(),
                                RespValue::bulk_string(at.to_string().into_bytes()),
                            ],
                        ),
                    ];
                }
            }
        }
        _ => {}
    }
    vec![(cmd_name.to_string(), args.to_vec())]
}

// --- Argument helpers ---

pub fn arg_to_bytes(arg: &RespValue) -> Option<&[u8]> {
    arg.as_str()
}

pub fn arg_to_vec(arg: &RespValue) -> Option<Vec<u8>> {
    arg.as_str().map(|b| b.to_vec())
}

pub fn arg_to_string(arg: &RespValue) -> Option<String> {
    arg.to_string_lossy()
}

pub fn arg_to_i64(arg: &RespValue) -> Option<i64> {
    let s = arg.to_string_lossy()?;
    s.parse().ok()
}

pub fn arg_to_u64(arg: &RespValue) -> Option<u64> {
    let s = arg.to_string_lossy()?;
    s.parse().ok()
}

pub fn arg_to_f64(arg: &RespValue) -> Option<f64> {
    let s = arg.to_string_lossy()?;
    let v: f64 = s.parse().ok()?;
    if v.is_nan() {
        return None;
    }
    Some(v)
}

/// `-ERR wrong number of arguments for 'x'`
pub fn wrong_arg_count(cmd_name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}'",
        cmd_name.to_lowercase()
    ))
}

pub fn wrong_type_error() -> RespValue {
    RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub fn not_an_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

pub fn not_a_float() -> RespValue {
    RespValue::error("ERR value is not a valid float")
}
