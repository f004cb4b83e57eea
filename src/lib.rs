//! # Cinnabar
//!
//! An in-memory key/value data store speaking a RESP subset over TCP.
//!
//! Cinnabar keeps a single typed keyspace (strings, hashes, lists, sets,
//! sorted sets, with bitmap and HyperLogLog views over the string type),
//! supports per-key expiration, MULTI/EXEC/WATCH transactions and
//! publish/subscribe channels, and can persist the keyspace through
//! point-in-time snapshots and/or an append-only command log.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod persistence;
pub mod pubsub;
pub mod resp;
pub mod server;
pub mod store;
pub mod types;
