//! Operational helpers for inspecting and clearing a resource's
//! coordination keys. These are tools for humans cleaning up after crashed
//! fleets; the protocol never calls them.

use crate::coordinator::Keys;
use crate::error::StoreError;
use crate::store::Store;

/// The store keys the protocol maintains for `resource`, in a stable order:
/// the three mutexes, the read and write gates, then the two counters.
pub fn protocol_keys(resource: &str) -> [String; 7] {
    let keys = Keys::new(resource);
    [
        keys.mutex1,
        keys.mutex2,
        keys.mutex3,
        keys.read_gate,
        keys.write_gate,
        keys.readcount,
        keys.writecount,
    ]
}

/// Snapshot the protocol keys for `resource` with their current values
/// (`None` for keys not currently present).
pub fn dump_resource_state<S: Store + ?Sized>(
    store: &S,
    resource: &str,
) -> Result<Vec<(String, Option<String>)>, StoreError> {
    protocol_keys(resource)
        .into_iter()
        .map(|key| {
            let value = store.get(&key)?;
            Ok((key, value))
        })
        .collect()
}

/// Delete every protocol key for `resource`. Returns how many were present.
///
/// Only safe when no participant is active: deleting live keys pulls gates
/// and counters out from under them.
pub fn purge_resource_state<S: Store + ?Sized>(
    store: &S,
    resource: &str,
) -> Result<usize, StoreError> {
    let mut removed = 0;
    for key in protocol_keys(resource) {
        if store.delete(&key)? {
            removed += 1;
        }
    }
    Ok(removed)
}
