use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock the mutex, recovering the guard if another thread panicked while holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
