//! Cloud storage backend for an LSM key-value store.
//!
//! This crate gives a storage engine the ordinary local-filesystem interface
//! it expects ([`virtual_env::VirtualEnv`]) while persisting data files in an
//! S3-compatible object store and write-ahead-log records in a
//! Kinesis-compatible log stream. See `SPEC_FULL.md` for the full design.

pub mod classify;
pub mod config;
pub mod dbid;
pub mod deferred_delete;
pub mod error;
pub mod global_init;
pub mod manifest;
pub mod metrics;
pub mod object_store_client;
pub mod obsolete;
pub mod posix_env;
pub mod retry;
pub mod savepoint;
pub mod stream_client;
pub mod tailer;
pub mod virtual_env;

pub use config::CloudEnvOptions;
pub use error::{Error, Result};
pub use virtual_env::VirtualEnv;
