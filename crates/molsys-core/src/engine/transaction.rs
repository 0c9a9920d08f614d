use super::system::System;
use std::ops::{Deref, DerefMut};
use tracing::trace;

/// Snapshot of a [`System`] that is restored when the guard is dropped
/// without being committed.
///
/// Taking the snapshot is a reference-count bump: the system's data is only
/// copied when the first edit made through the guard diverges from it.
pub struct SaveState<'a> {
    system: &'a mut System,
    snapshot: Option<System>,
}

impl<'a> SaveState<'a> {
    pub fn save(system: &'a mut System) -> Self {
        let snapshot = system.clone();
        Self {
            system,
            snapshot: Some(snapshot),
        }
    }

    /// The state the system is restored to.
    pub fn snapshot(&self) -> Option<&System> {
        self.snapshot.as_ref()
    }

    /// Keeps every edit made through the guard.
    pub fn commit(mut self) {
        self.snapshot = None;
    }

    /// Restores the snapshot now.
    pub fn restore(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if *self.system != snapshot {
                trace!(
                    system = %snapshot.name(),
                    restored_version = %snapshot.version(),
                    "restoring system snapshot"
                );
            }
            *self.system = snapshot;
        }
    }
}

impl Deref for SaveState<'_> {
    type Target = System;

    fn deref(&self) -> &System {
        self.system
    }
}

impl DerefMut for SaveState<'_> {
    fn deref_mut(&mut self) -> &mut System {
        self.system
    }
}

impl Drop for SaveState<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
