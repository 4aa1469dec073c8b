//! The readers/writer protocol.
//!
//! This is the classical second readers/writers solution, expressed as
//! fixed sequences of primitive-lock and counter operations against the
//! coordination store so that the participants can be unrelated OS
//! processes. Seven keys coordinate each resource:
//!
//! - `mutex1__R` / `readcount__R`: serialize the readers' counter and the
//!   first/last-reader decision.
//! - `mutex2__R` / `writecount__R`: the same for writers.
//! - `mutex3__R`: the turnstile readers pass on arrival. Writers never
//!   take it, so a writer queued on the read gate only ever has to outwait
//!   the single reader currently past the turnstile; a continuous reader
//!   stream cannot starve it.
//! - `r__R`: the read gate, held by the writer cohort to keep new readers
//!   out while writers are active or waiting.
//! - `w__R`: the write gate, held by the reader cohort while readers are
//!   inside and by each writer for the span of its critical section.
//!
//! The gates are owned by roles, not participants: whichever reader ends
//! the epoch must be able to release the gate whichever reader started it
//! acquired. The shared cohort tokens make that legal; it is safe because
//! gate mutation only happens under the corresponding counter mutex.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::lock;
use crate::reaper::{self, ProcessReaper, TerminationScope};
use crate::store::{RedisStore, Store};

/// Names of the seven store keys coordinating one resource. The schema is a
/// wire contract: participants from heterogeneous implementations
/// interoperate only if every name matches bit for bit.
pub(crate) struct Keys {
    pub mutex1: String,
    pub mutex2: String,
    pub mutex3: String,
    /// `r__<resource>`, the read gate.
    pub read_gate: String,
    /// `w__<resource>`, the write gate.
    pub write_gate: String,
    pub readcount: String,
    pub writecount: String,
}

impl Keys {
    pub fn new(resource: &str) -> Keys {
        Keys {
            mutex1: format!("mutex1__{}", resource),
            mutex2: format!("mutex2__{}", resource),
            mutex3: format!("mutex3__{}", resource),
            read_gate: format!("r__{}", resource),
            write_gate: format!("w__{}", resource),
            readcount: format!("readcount__{}", resource),
            writecount: format!("writecount__{}", resource),
        }
    }
}

/// Cohort owner tokens, also wire contract. The names look swapped (the
/// readers' token sits on the write gate and vice versa) but they are what
/// every existing participant stores, so they must be copied verbatim, not
/// tidied up.
pub(crate) const READER_COHORT: &str = "id_reader";
pub(crate) const WRITER_COHORT: &str = "id_writer";

#[derive(Clone, Copy)]
enum Role {
    Reader,
    Writer,
}

/// Entries this process has made and not yet unwound, per resource. The
/// termination handler refunds exactly these on SIGTERM.
#[derive(Clone, Copy, Default)]
struct Outstanding {
    readers: u64,
    writers: u64,
}

thread_local! {
    // Resources this thread is currently inside a critical section for.
    // The protocol is not reentrant; re-entering would deadlock on the
    // gates, so it is refused up front instead.
    static IN_SECTION: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

struct SectionToken {
    resource: String,
}

impl SectionToken {
    fn enter(resource: &str) -> Result<SectionToken, Error> {
        IN_SECTION.with(|section| {
            if !section.borrow_mut().insert(resource.to_string()) {
                return Err(Error::Reentrant {
                    resource: resource.to_string(),
                });
            }
            Ok(())
        })?;
        Ok(SectionToken {
            resource: resource.to_string(),
        })
    }
}

impl Drop for SectionToken {
    fn drop(&mut self) {
        IN_SECTION.with(|section| {
            section.borrow_mut().remove(&self.resource);
        });
    }
}

struct Inner<S> {
    store: S,
    config: Config,
    outstanding: Mutex<HashMap<String, Outstanding>>,
}

/// Cross-process readers/writer coordinator for named resources.
///
/// Cheap to clone; clones share the store connection and the per-process
/// bookkeeping. Construct one per process, hand clones to whatever code
/// wraps the shared resource.
pub struct Coordinator<S = RedisStore> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Coordinator<S> {
        Coordinator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Coordinator<RedisStore> {
    /// Connect to the coordination store named by `config.endpoint`.
    pub fn connect(config: Config) -> Result<Coordinator<RedisStore>, Error> {
        let store = RedisStore::connect(&config.endpoint)?;
        Ok(Coordinator::with_store(store, config))
    }
}

impl<S: Store> Coordinator<S> {
    /// Build a coordinator over any store implementation.
    pub fn with_store(store: S, config: Config) -> Coordinator<S> {
        Coordinator {
            inner: Arc::new(Inner {
                store,
                config,
                outstanding: Mutex::default(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Run `section` while holding shared read access to `resource`.
    ///
    /// Any number of readers may be inside concurrently; writers are locked
    /// out for the duration. The closure's return value becomes the
    /// operation's result. A panic inside the closure still runs the exit
    /// protocol before resuming the unwind.
    pub fn with_read_access<T>(
        &self,
        resource: &str,
        section: impl FnOnce() -> T,
    ) -> Result<T, Error> {
        let _token = SectionToken::enter(resource)?;
        let keys = Keys::new(resource);
        self.inner.read_entry(resource, &keys)?;
        let exit = scopeguard::guard((), |()| {
            // Unwinding out of the critical section: the counter must still
            // be wound back or the read epoch never ends.
            if let Err(err) = self.inner.read_exit(resource, &keys) {
                warn!(resource, err = %err, "read exit failed while unwinding");
            }
        });
        let value = section();
        ScopeGuard::into_inner(exit);
        self.inner.read_exit(resource, &keys)?;
        Ok(value)
    }

    /// Run `section` while holding exclusive write access to `resource`.
    ///
    /// Writers are serialized with each other and exclude all readers. See
    /// [`Coordinator::with_read_access`] for the closure and panic
    /// semantics.
    pub fn with_write_access<T>(
        &self,
        resource: &str,
        section: impl FnOnce() -> T,
    ) -> Result<T, Error> {
        let _token = SectionToken::enter(resource)?;
        let keys = Keys::new(resource);
        let gate_owner = self.inner.write_entry(resource, &keys)?;
        let exit = scopeguard::guard((), |()| {
            if let Err(err) = self.inner.write_exit(resource, &keys, &gate_owner) {
                warn!(resource, err = %err, "write exit failed while unwinding");
            }
        });
        let value = section();
        ScopeGuard::into_inner(exit);
        self.inner.write_exit(resource, &keys, &gate_owner)?;
        Ok(value)
    }

    /// Roll back every piece of coordination state owned by the current
    /// process: participant-owned locks (found by their pid-prefixed owner
    /// tokens) and the reader/writer registrations recorded since the last
    /// reap. Invoked by the SIGTERM watcher behind
    /// [`Coordinator::termination_scope`]; public so embedders that manage
    /// signals themselves can drive the same cleanup.
    ///
    /// Best-effort: the process is assumed to be dying, so
    /// failures are logged and skipped rather than returned.
    pub fn reap_process_state(&self) {
        self.inner.reap();
    }
}

impl<S: Store + 'static> Coordinator<S> {
    /// Arm SIGTERM cleanup for this coordinator. While the returned scope
    /// is alive, a terminate signal first runs [`reap_process_state`] (for
    /// every armed coordinator in the process) and only then lets the
    /// default disposition end the process. Dropping the scope disarms this
    /// coordinator.
    ///
    /// [`reap_process_state`]: Coordinator::reap_process_state
    pub fn termination_scope(&self) -> TerminationScope {
        let inner: Arc<dyn ProcessReaper> = self.inner.clone();
        let weak: Weak<dyn ProcessReaper> = Arc::downgrade(&inner);
        reaper::register(weak)
    }
}

impl<S: Store> ProcessReaper for Inner<S> {
    fn reap_process_state(&self) {
        self.reap();
    }
}

impl<S: Store> Inner<S> {
    /// Scoped primitive lock: acquire `name` with a fresh process-owned
    /// token, run `body`, release. A release that finds the token gone
    /// means the section outlived the lock's TTL budget, which is fatal for
    /// the operation (unlike a cohort gate, nobody else was allowed to
    /// touch this key while we held it).
    fn with_lock<T>(&self, name: &str, body: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
        let owner = lock::owner_token();
        if !lock::acquire(
            &self.store,
            name,
            &owner,
            self.config.acq_timeout,
            self.config.hold_timeout,
        )? {
            return Err(Error::AcquireTimeout {
                key: name.to_string(),
                timeout: self.config.acq_timeout,
            });
        }
        let unwind_release = scopeguard::guard((), |()| {
            // Unwinding out of `body`: release best-effort without masking
            // the panic.
            match lock::release(&self.store, name, &owner) {
                Ok(true) => {}
                Ok(false) => warn!(lock = name, "lock expired while unwinding"),
                Err(err) => warn!(lock = name, err = %err, "release failed while unwinding"),
            }
        });
        let result = body();
        ScopeGuard::into_inner(unwind_release);
        match lock::release(&self.store, name, &owner) {
            Ok(true) => result,
            Ok(false) => match result {
                Ok(_) => Err(Error::LockLost {
                    key: name.to_string(),
                }),
                Err(err) => {
                    warn!(lock = name, "lock expired during a failing section");
                    Err(err)
                }
            },
            Err(release_err) => match result {
                Ok(_) => Err(release_err.into()),
                Err(err) => {
                    warn!(lock = name, err = %release_err, "release failed during a failing section");
                    Err(err)
                }
            },
        }
    }

    fn note_entry(&self, resource: &str, role: Role) {
        let mut ledger = self.outstanding.lock();
        let counts = ledger.entry(resource.to_string()).or_default();
        match role {
            Role::Reader => counts.readers += 1,
            Role::Writer => counts.writers += 1,
        }
    }

    fn note_exit(&self, resource: &str, role: Role) {
        let mut ledger = self.outstanding.lock();
        if let Some(counts) = ledger.get_mut(resource) {
            match role {
                Role::Reader => counts.readers = counts.readers.saturating_sub(1),
                Role::Writer => counts.writers = counts.writers.saturating_sub(1),
            }
            if counts.readers == 0 && counts.writers == 0 {
                ledger.remove(resource);
            }
        }
    }

    fn read_entry(&self, resource: &str, keys: &Keys) -> Result<(), Error> {
        self.with_lock(&keys.mutex3, || {
            self.with_lock(&keys.read_gate, || {
                self.with_lock(&keys.mutex1, || {
                    let n = self.store.incr(&keys.readcount, 1)?;
                    if n < 1 {
                        self.store.decr(&keys.readcount, 1)?;
                        return Err(Error::invariant(
                            resource,
                            format!("readcount {} after increment", n),
                        ));
                    }
                    if n == 1 {
                        // First reader of the epoch takes the write gate on
                        // behalf of the whole cohort.
                        let got = lock::acquire(
                            &self.store,
                            &keys.write_gate,
                            READER_COHORT,
                            self.config.acq_timeout,
                            self.config.hold_timeout,
                        )?;
                        if !got {
                            self.store.decr(&keys.readcount, 1)?;
                            return Err(Error::AcquireTimeout {
                                key: keys.write_gate.clone(),
                                timeout: self.config.acq_timeout,
                            });
                        }
                    } else if self.store.get(&keys.write_gate)?.is_none() {
                        // Readers are supposedly active yet nobody holds the
                        // gate: it expired or was tampered with, and the
                        // epoch accounting cannot be trusted.
                        self.store.decr(&keys.readcount, 1)?;
                        return Err(Error::invariant(
                            resource,
                            "write gate unset with readers active",
                        ));
                    }
                    self.note_entry(resource, Role::Reader);
                    debug!(resource, readers = n, "read entry");
                    Ok(())
                })
            })
        })
    }

    fn read_exit(&self, resource: &str, keys: &Keys) -> Result<(), Error> {
        self.with_lock(&keys.mutex1, || {
            self.note_exit(resource, Role::Reader);
            let n = self.store.decr(&keys.readcount, 1)?;
            if n < 0 {
                self.store.incr(&keys.readcount, 1)?;
                return Err(Error::invariant(
                    resource,
                    format!("readcount {} after decrement", n),
                ));
            }
            if n == 0 {
                // Last reader out closes the epoch. Losing the gate here
                // only means its TTL elapsed mid-epoch; the next epoch
                // recreates it, so warn rather than fail the read.
                if !lock::release(&self.store, &keys.write_gate, READER_COHORT)? {
                    warn!(resource, gate = %keys.write_gate, "write gate lost before cohort release");
                }
            }
            debug!(resource, readers = n, "read exit");
            Ok(())
        })
    }

    fn write_entry(&self, resource: &str, keys: &Keys) -> Result<String, Error> {
        self.with_lock(&keys.mutex2, || {
            let n = self.store.incr(&keys.writecount, 1)?;
            if n < 1 {
                self.store.decr(&keys.writecount, 1)?;
                return Err(Error::invariant(
                    resource,
                    format!("writecount {} after increment", n),
                ));
            }
            if n == 1 {
                // First writer of the epoch locks new readers out. Readers
                // already past the gate drain on their own; we wait for
                // them at the write gate below.
                let got = lock::acquire(
                    &self.store,
                    &keys.read_gate,
                    WRITER_COHORT,
                    self.config.acq_timeout,
                    self.config.hold_timeout,
                )?;
                if !got {
                    self.store.decr(&keys.writecount, 1)?;
                    return Err(Error::AcquireTimeout {
                        key: keys.read_gate.clone(),
                        timeout: self.config.acq_timeout,
                    });
                }
            } else if self.store.get(&keys.read_gate)?.is_none() {
                self.store.decr(&keys.writecount, 1)?;
                return Err(Error::invariant(
                    resource,
                    "read gate unset with writers active",
                ));
            }
            self.note_entry(resource, Role::Writer);
            debug!(resource, writers = n, "writer registered");
            Ok(())
        })?;

        // The write gate serializes writers and waits out the previous read
        // epoch. Held with a process-owned token for the whole critical
        // section.
        let owner = lock::owner_token();
        let got = lock::acquire(
            &self.store,
            &keys.write_gate,
            &owner,
            self.config.acq_timeout,
            self.config.hold_timeout,
        )?;
        if !got {
            // Undo the registration so the failed entry leaves no trace.
            if let Err(err) = self.with_lock(&keys.mutex2, || {
                self.note_exit(resource, Role::Writer);
                let n = self.store.decr(&keys.writecount, 1)?;
                if n == 0 {
                    if !lock::release(&self.store, &keys.read_gate, WRITER_COHORT)? {
                        warn!(resource, gate = %keys.read_gate, "read gate lost during entry rollback");
                    }
                }
                Ok(())
            }) {
                warn!(resource, err = %err, "writer registration rollback failed");
            }
            return Err(Error::AcquireTimeout {
                key: keys.write_gate.clone(),
                timeout: self.config.acq_timeout,
            });
        }
        Ok(owner)
    }

    fn write_exit(&self, resource: &str, keys: &Keys, gate_owner: &str) -> Result<(), Error> {
        // Open the gate first so the next participant can start moving
        // while this writer deregisters.
        let released = lock::release(&self.store, &keys.write_gate, gate_owner)?;
        self.with_lock(&keys.mutex2, || {
            self.note_exit(resource, Role::Writer);
            let n = self.store.decr(&keys.writecount, 1)?;
            if n < 0 {
                self.store.incr(&keys.writecount, 1)?;
                return Err(Error::invariant(
                    resource,
                    format!("writecount {} after decrement", n),
                ));
            }
            if n == 0 {
                if !lock::release(&self.store, &keys.read_gate, WRITER_COHORT)? {
                    warn!(resource, gate = %keys.read_gate, "read gate lost before cohort release");
                }
            }
            debug!(resource, writers = n, "write exit");
            Ok(())
        })?;
        if !released {
            // The gate expired mid-section: exclusivity can no longer be
            // vouched for, and the section clearly blew its TTL budget.
            return Err(Error::LockLost {
                key: keys.write_gate.clone(),
            });
        }
        Ok(())
    }

    fn reap(&self) {
        // Locks owned exclusively by this process carry its pid prefix in
        // their value; the cohort gates carry the shared tokens instead and
        // are handled through the counter refunds below.
        let prefix = lock::pid_prefix(std::process::id());
        match self.store.keys_matching("*") {
            Ok(keys) => {
                for key in keys {
                    let value = match self.store.get(&key) {
                        Ok(Some(value)) => value,
                        // Gone since the scan, or unreadable; either way
                        // there is nothing to release.
                        _ => continue,
                    };
                    if !value.starts_with(&prefix) {
                        continue;
                    }
                    match lock::release(&self.store, &key, &value) {
                        Ok(_) => debug!(key = %key, "reaped process-owned lock"),
                        Err(err) => warn!(key = %key, err = %err, "failed to reap lock"),
                    }
                }
            }
            Err(err) => warn!(err = %err, "could not enumerate keys for reaping"),
        }

        let outstanding: Vec<(String, Outstanding)> =
            self.outstanding.lock().drain().collect();
        for (resource, counts) in outstanding {
            let keys = Keys::new(&resource);
            if counts.readers > 0 {
                if let Err(err) = self.refund(
                    &keys.mutex1,
                    &keys.readcount,
                    counts.readers,
                    &keys.write_gate,
                    READER_COHORT,
                ) {
                    warn!(resource = %resource, err = %err, "failed to refund read entries");
                }
            }
            if counts.writers > 0 {
                if let Err(err) = self.refund(
                    &keys.mutex2,
                    &keys.writecount,
                    counts.writers,
                    &keys.read_gate,
                    WRITER_COHORT,
                ) {
                    warn!(resource = %resource, err = %err, "failed to refund write entries");
                }
            }
        }
    }

    /// Decrement `counter` by `count` under `mutex`; release the cohort
    /// gate if no entries remain afterwards.
    fn refund(
        &self,
        mutex: &str,
        counter: &str,
        count: u64,
        gate: &str,
        cohort: &str,
    ) -> Result<(), Error> {
        self.with_lock(mutex, || {
            let n = self.store.decr(counter, count as i64)?;
            if n == 0 {
                if !lock::release(&self.store, gate, cohort)? {
                    warn!(gate, "cohort gate lost before terminal release");
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn coordinator() -> Coordinator<MemoryStore> {
        let config = Config {
            acq_timeout: Duration::from_millis(200),
            hold_timeout: Duration::from_secs(60),
            ..Config::default()
        };
        Coordinator::with_store(MemoryStore::new(), config)
    }

    #[test]
    fn cohort_tokens_match_the_wire_contract() {
        // These two strings are shared with every other implementation
        // talking to the same store; renaming them breaks interop.
        assert_eq!(READER_COHORT, "id_reader");
        assert_eq!(WRITER_COHORT, "id_writer");
    }

    #[test]
    fn key_schema_matches_the_wire_contract() {
        let keys = Keys::new("/tmp/data.h5");
        assert_eq!(keys.mutex1, "mutex1__/tmp/data.h5");
        assert_eq!(keys.mutex2, "mutex2__/tmp/data.h5");
        assert_eq!(keys.mutex3, "mutex3__/tmp/data.h5");
        assert_eq!(keys.read_gate, "r__/tmp/data.h5");
        assert_eq!(keys.write_gate, "w__/tmp/data.h5");
        assert_eq!(keys.readcount, "readcount__/tmp/data.h5");
        assert_eq!(keys.writecount, "writecount__/tmp/data.h5");
    }

    #[test]
    fn scoped_lock_lost_is_fatal() {
        let coordinator = coordinator();
        let store = coordinator.store();
        let result = coordinator.inner.with_lock("mutex1__res", || {
            // Usurp the lock mid-section, as TTL expiry plus a faster rival
            // would.
            store.delete("mutex1__res").unwrap();
            store
                .set_if_absent("mutex1__res", "pid0_intruder", Duration::from_secs(60))
                .unwrap();
            Ok(())
        });
        assert!(matches!(result, Err(Error::LockLost { .. })));
        // The intruder's lock is left alone.
        assert_eq!(
            store.get("mutex1__res").unwrap().as_deref(),
            Some("pid0_intruder")
        );
    }

    #[test]
    fn scoped_lock_body_error_wins_over_lost_lock() {
        let coordinator = coordinator();
        let store = coordinator.store();
        let result: Result<(), Error> = coordinator.inner.with_lock("mutex1__res", || {
            store.delete("mutex1__res").unwrap();
            Err(Error::invariant("res", "boom"))
        });
        assert!(matches!(result, Err(Error::InvariantViolation { .. })));
    }

    #[test]
    fn read_entry_publishes_cohort_state() {
        let coordinator = coordinator();
        let keys = Keys::new("vol");
        coordinator.inner.read_entry("vol", &keys).unwrap();
        coordinator.inner.read_entry("vol", &keys).unwrap();
        let store = coordinator.store();
        assert_eq!(store.get("readcount__vol").unwrap().as_deref(), Some("2"));
        assert_eq!(
            store.get("w__vol").unwrap().as_deref(),
            Some(READER_COHORT)
        );
        // Entry mutexes are all released between protocol steps.
        assert_eq!(store.get("mutex1__vol").unwrap(), None);
        assert_eq!(store.get("mutex3__vol").unwrap(), None);
        assert_eq!(store.get("r__vol").unwrap(), None);

        coordinator.inner.read_exit("vol", &keys).unwrap();
        coordinator.inner.read_exit("vol", &keys).unwrap();
        assert_eq!(store.get("readcount__vol").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("w__vol").unwrap(), None);
    }

    #[test]
    fn reap_refunds_outstanding_read_entries() {
        let coordinator = coordinator();
        let keys = Keys::new("vol");
        coordinator.inner.read_entry("vol", &keys).unwrap();
        coordinator.inner.read_entry("vol", &keys).unwrap();

        // The process "dies" here: exits never run, the reaper does.
        coordinator.reap_process_state();

        let store = coordinator.store();
        assert_eq!(store.get("readcount__vol").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("w__vol").unwrap(), None);
    }

    #[test]
    fn reap_refunds_outstanding_write_entry_and_sweeps_own_gate() {
        let coordinator = coordinator();
        let keys = Keys::new("vol");
        let gate_owner = coordinator.inner.write_entry("vol", &keys).unwrap();
        let store = coordinator.store();
        assert_eq!(
            store.get("w__vol").unwrap().as_deref(),
            Some(gate_owner.as_str())
        );
        assert_eq!(
            store.get("r__vol").unwrap().as_deref(),
            Some(WRITER_COHORT)
        );

        coordinator.reap_process_state();

        // The pid sweep released the write gate, the refund released the
        // read gate and zeroed the counter.
        assert_eq!(store.get("w__vol").unwrap(), None);
        assert_eq!(store.get("r__vol").unwrap(), None);
        assert_eq!(store.get("writecount__vol").unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn reap_leaves_foreign_locks_alone() {
        let coordinator = coordinator();
        let store = coordinator.store();
        let own = format!("{}nonce", lock::pid_prefix(std::process::id()));
        store
            .set_if_absent("mutex1__other", &own, Duration::from_secs(60))
            .unwrap();
        store
            .set_if_absent("mutex2__other", "pid0_foreign", Duration::from_secs(60))
            .unwrap();

        coordinator.reap_process_state();

        assert_eq!(store.get("mutex1__other").unwrap(), None);
        assert_eq!(
            store.get("mutex2__other").unwrap().as_deref(),
            Some("pid0_foreign")
        );
    }

    #[test]
    fn reap_refunds_only_ledgered_entries() {
        // One of the two entries exited cleanly; only the remaining one is
        // refunded on death.
        let coordinator = coordinator();
        let keys = Keys::new("vol");
        coordinator.inner.read_entry("vol", &keys).unwrap();
        coordinator.inner.read_entry("vol", &keys).unwrap();
        coordinator.inner.read_exit("vol", &keys).unwrap();

        coordinator.reap_process_state();

        let store = coordinator.store();
        assert_eq!(store.get("readcount__vol").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("w__vol").unwrap(), None);
    }

    #[test]
    fn reap_with_surviving_readers_keeps_the_gate() {
        // Two "processes" share one store. The dying one refunds its single
        // entry; the survivor still holds the epoch open, so the cohort
        // gate must stay.
        let store = Arc::new(MemoryStore::new());
        let config = Config {
            acq_timeout: Duration::from_millis(200),
            hold_timeout: Duration::from_secs(60),
            ..Config::default()
        };
        let dying = Coordinator::with_store(Arc::clone(&store), config.clone());
        let survivor = Coordinator::with_store(Arc::clone(&store), config);
        let keys = Keys::new("vol");

        survivor.inner.read_entry("vol", &keys).unwrap();
        dying.inner.read_entry("vol", &keys).unwrap();
        dying.reap_process_state();

        assert_eq!(store.get("readcount__vol").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("w__vol").unwrap().as_deref(), Some(READER_COHORT));

        survivor.inner.read_exit("vol", &keys).unwrap();
        assert_eq!(store.get("readcount__vol").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("w__vol").unwrap(), None);
    }
}
