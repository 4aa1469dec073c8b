//! Cross-process readers/writer coordination over a shared key-value store.
//!
//! Independent OS processes, with no common parent and no shared memory,
//! often need to arbitrate access to one external resource: an HDF5 file
//! that tolerates many concurrent readers but only one writer. This crate
//! coordinates them through a small set of named keys in an external store
//! (redis by default), implementing the classical *second* readers/writers
//! solution: readers run in parallel, writers are exclusive, and a waiting
//! writer is never starved by a continuous stream of readers.
//!
//! The moving parts, bottom up:
//! - [`Store`] is the thin contract on the coordination store: atomic
//!   set-if-absent with expiry, atomic counters, compare-and-delete.
//!   [`RedisStore`] talks to a server; [`MemoryStore`] implements the same
//!   semantics in-process.
//! - A primitive advisory lock on top of that: a key whose value is an
//!   owner token and whose TTL bounds the damage a dead holder can do.
//! - The protocol itself, exposed as two capabilities on [`Coordinator`]:
//!   [`with_read_access`] and [`with_write_access`] run a caller-supplied
//!   critical section under the appropriate epoch bookkeeping.
//! - A termination-safe scope: [`Coordinator::termination_scope`] arms a
//!   SIGTERM watcher that rolls back whatever the dying process still holds
//!   before the process goes down.
//!
//! The protocol is wire-compatible with other implementations
//! speaking the same key schema (`mutex1__R` … `writecount__R`, cohort
//! tokens `id_reader`/`id_writer`), so heterogeneous participants can
//! coordinate on one resource.
//!
//! Critical sections must finish within the configured hold budget and must
//! not re-enter the coordinator for the same resource (the protocol is not
//! reentrant; re-entry is detected and refused).
//!
//! Example:
//! ```
//! use rwcoord::{Config, Coordinator, MemoryStore};
//!
//! let coordinator = Coordinator::with_store(MemoryStore::new(), Config::default());
//!
//! let shape = coordinator.with_read_access("/data/weather.h5", || {
//!     // open the file read-only and inspect it here
//!     (8000, 1500)
//! })?;
//! assert_eq!(shape, (8000, 1500));
//!
//! coordinator.with_write_access("/data/weather.h5", || {
//!     // mutate the file here; readers are locked out until this returns
//! })?;
//! # Ok::<(), rwcoord::Error>(())
//! ```
//!
//! [`with_read_access`]: Coordinator::with_read_access
//! [`with_write_access`]: Coordinator::with_write_access

mod admin;
mod config;
mod coordinator;
mod error;
mod lock;
mod reaper;
mod store;

pub use crate::admin::{dump_resource_state, protocol_keys, purge_resource_state};
pub use crate::config::{Config, StoreEndpoint};
pub use crate::coordinator::Coordinator;
pub use crate::error::{Error, StoreError};
pub use crate::reaper::TerminationScope;
pub use crate::store::{MemoryStore, RedisStore, Store, Ttl};
