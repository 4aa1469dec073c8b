//! The termination-safe scope.
//!
//! A participant killed mid-critical-section leaves counters inflated and
//! locks held; TTLs cap the damage for the locks, but counters never expire
//! on their own. The reaper is the process's last word: a watcher thread,
//! armed by [`TerminationScope`], that on SIGTERM releases every lock whose
//! owner token carries this process's pid prefix, refunds the outstanding
//! reader/writer registrations, and only then lets the default signal
//! disposition end the process.
//!
//! The watcher consumes the signal rather than replacing a raw handler, so
//! other `signal-hook` users in the host application keep their own
//! registrations; the default action runs once cleanup is done.

use std::sync::Weak;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Signals;
use tracing::{debug, warn};

/// Crate-internal face of a coordinator for the watcher thread: erase the
/// store type, keep only "clean up after the current process".
pub(crate) trait ProcessReaper: Send + Sync {
    fn reap_process_state(&self);
}

struct Registry {
    coordinators: Vec<(u64, Weak<dyn ProcessReaper>)>,
    next_id: u64,
    watcher_started: bool,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| {
    Mutex::new(Registry {
        coordinators: Vec::new(),
        next_id: 0,
        watcher_started: false,
    })
});

/// Keeps SIGTERM cleanup armed for one coordinator. Created through
/// [`Coordinator::termination_scope`]; dropping it disarms that
/// coordinator (the watcher thread stays, it simply has nothing left to
/// reap for it).
///
/// [`Coordinator::termination_scope`]: crate::Coordinator::termination_scope
#[must_use = "cleanup is only armed while the scope is alive"]
pub struct TerminationScope {
    id: u64,
}

impl Drop for TerminationScope {
    fn drop(&mut self) {
        let mut registry = REGISTRY.lock();
        registry.coordinators.retain(|(id, _)| *id != self.id);
    }
}

pub(crate) fn register(reaper: Weak<dyn ProcessReaper>) -> TerminationScope {
    let mut registry = REGISTRY.lock();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.coordinators.push((id, reaper));
    if !registry.watcher_started {
        registry.watcher_started = true;
        spawn_watcher();
    }
    TerminationScope { id }
}

/// Run every armed coordinator's cleanup. Factored out of the watcher so
/// the sequence is exercisable without delivering a real signal.
pub(crate) fn run_reapers() {
    // Snapshot first: reaping talks to the store and must not happen under
    // the registry lock.
    let reapers: Vec<Weak<dyn ProcessReaper>> = REGISTRY
        .lock()
        .coordinators
        .iter()
        .map(|(_, weak)| weak.clone())
        .collect();
    for weak in reapers {
        if let Some(coordinator) = weak.upgrade() {
            coordinator.reap_process_state();
        }
    }
}

fn spawn_watcher() {
    let mut signals = match Signals::new([SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!(err = %err, "could not install SIGTERM watcher");
            return;
        }
    };
    let spawned = std::thread::Builder::new()
        .name("rwcoord-sigterm".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                debug!("SIGTERM received, reaping process-owned coordination state");
                run_reapers();
                // Cleanup done; hand the signal back to its default
                // disposition so the process still dies like one that was
                // politely terminated.
                if let Err(err) = signal_hook::low_level::emulate_default_handler(SIGTERM) {
                    warn!(err = %err, "could not re-deliver SIGTERM");
                }
            }
        });
    if let Err(err) = spawned {
        warn!(err = %err, "could not spawn SIGTERM watcher thread");
    }
}
