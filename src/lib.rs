//! # Kvdis
//!
//! A Redis-compatible data-structure server layered over a transactional,
//! ordered key-value store.
//!
//! Strings, hashes, lists, sets and sorted sets are encoded into flat store
//! keys by [`codec`]; [`engine`] implements the operations on top of store
//! transactions and runs the background expiration, async deletion, leader
//! election and GC tasks. Clients speak RESP2 to [`server`].

pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod resp;
pub mod server;
pub mod store;
pub mod types;
