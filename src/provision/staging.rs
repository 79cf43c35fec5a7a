/// Staging-area access control
///
/// Runs read a language's library root concurrently; a refresh rewrites it.
/// Each run holds a [`StagingLease`] for its whole lifetime and a refresh
/// runs only once every lease is returned, so a rebuild never lands
/// mid-execution. While a refresh is pending no new lease is granted.
use log::debug;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct LeaseState {
    leases: usize,
    refreshing: bool,
}

#[derive(Debug, Default)]
pub struct StagingArea {
    state: Mutex<LeaseState>,
    changed: Condvar,
}

/// Shared read access to a staging area. Released on drop.
#[derive(Debug)]
pub struct StagingLease {
    area: Arc<StagingArea>,
}

impl StagingArea {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, LeaseState>) -> MutexGuard<'a, LeaseState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until no refresh is pending, then take a lease.
    pub fn lease(self: &Arc<Self>) -> StagingLease {
        let mut state = self.lock();
        while state.refreshing {
            state = self.wait(state);
        }
        state.leases += 1;
        StagingLease {
            area: Arc::clone(self),
        }
    }

    pub fn active_leases(&self) -> usize {
        self.lock().leases
    }

    /// Run `rebuild` with no lease outstanding.
    pub fn exclusive<T, F>(&self, rebuild: F) -> T
    where
        F: FnOnce() -> T,
    {
        let mut state = self.lock();
        while state.refreshing {
            state = self.wait(state);
        }
        state.refreshing = true;
        while state.leases > 0 {
            debug!("Refresh waiting for {} active runs", state.leases);
            state = self.wait(state);
        }
        drop(state);

        let _reset = RefreshGuard { area: self };
        rebuild()
    }
}

/// Clears the refreshing flag even if the rebuild panics.
struct RefreshGuard<'a> {
    area: &'a StagingArea,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.area.lock().refreshing = false;
        self.area.changed.notify_all();
    }
}

impl Drop for StagingLease {
    fn drop(&mut self) {
        let mut state = self.area.lock();
        state.leases = state.leases.saturating_sub(1);
        drop(state);
        self.area.changed.notify_all();
    }
}
