//! The primitive distributed lock.
//!
//! An advisory lock is a store key whose presence means "held" and whose
//! value identifies the holder. Every set carries a TTL so a dead holder's
//! lock eventually evaporates instead of wedging everyone else. Release is
//! compare-and-delete on the owner token: a participant whose lock expired
//! and was reacquired by someone else cannot yank it away from the new
//! holder.
//!
//! Contention is not an error at this level. `acquire` polls until its
//! deadline and reports plain success or failure; `release` reports whether
//! the token still matched. The scoped form on the coordinator turns those
//! into typed errors.

use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{Store, Ttl};

/// Delay between polls of a contended lock.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Owner token for a participant-owned lock: pid-prefixed so the
/// termination sweep can find every lock this process holds, nonce-suffixed
/// for global uniqueness.
pub(crate) fn owner_token() -> String {
    format!("pid{}_{}", std::process::id(), Uuid::new_v4())
}

/// The value prefix shared by every lock owned by process `pid`.
pub(crate) fn pid_prefix(pid: u32) -> String {
    format!("pid{}_", pid)
}

/// Poll for the lock `name` until it is ours or `acq_timeout` has elapsed.
/// The key is set to `owner` with expiry `hold_timeout` on success.
pub(crate) fn acquire<S: Store + ?Sized>(
    store: &S,
    name: &str,
    owner: &str,
    acq_timeout: Duration,
    hold_timeout: Duration,
) -> Result<bool, StoreError> {
    let deadline = Instant::now() + acq_timeout;
    loop {
        if store.set_if_absent(name, owner, hold_timeout)? {
            return Ok(true);
        }
        // A held key without expiry is a crash artifact (set and expiry
        // applied in two steps by some participant). Give it a TTL so it
        // cannot wedge the protocol forever.
        if store.ttl(name)? == Ttl::NoExpiry {
            store.expire(name, hold_timeout)?;
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Delete `name` iff it still holds `owner`. False means the lock expired,
/// and possibly now belongs to someone else.
pub(crate) fn release<S: Store + ?Sized>(
    store: &S,
    name: &str,
    owner: &str,
) -> Result<bool, StoreError> {
    store.compare_and_delete(name, owner)
}
