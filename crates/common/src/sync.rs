//! Poison-tolerant locking for the synchronous stores

use std::sync::{Mutex, MutexGuard};

/// Lock a `Mutex`, recovering the data if a previous holder panicked.
pub trait MutexExt<T> {
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    mutex_type = std::any::type_name::<T>(),
                    file = loc.file(),
                    line = loc.line(),
                    "mutex poisoned, recovering inner state"
                );
                poisoned.into_inner()
            }
        }
    }
}
