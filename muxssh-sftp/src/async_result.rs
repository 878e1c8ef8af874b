use std::{
    convert::Infallible,
    sync::{Mutex, PoisonError},
};

use crate::{Error, Result};

enum Slot<T> {
    Pending,
    Ready(Result<T>),
    Taken,
}

/// The handle to an operation running in the background, completed exactly once
/// and whose result is retrieved exactly once.
pub struct AsyncResult<T> {
    slot: Mutex<Slot<T>>,
    completed: Mutex<Option<flume::Sender<Infallible>>>,
    done: flume::Receiver<Infallible>,
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncResult<T> {
    /// A pending operation.
    pub fn new() -> Self {
        let (completed, done) = flume::bounded(0);

        Self {
            slot: Mutex::new(Slot::Pending),
            completed: Mutex::new(Some(completed)),
            done,
        }
    }

    /// Whether the operation has completed.
    pub fn is_completed(&self) -> bool {
        !matches!(
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner),
            Slot::Pending
        )
    }

    /// Complete the operation with `result`, waking the waiters of [`AsyncResult::end`].
    ///
    /// Fails with [`Error::InvalidOperation`] if the operation has already completed.
    pub fn complete(&self, result: Result<T>) -> Result<()> {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if !matches!(*slot, Slot::Pending) {
                return Err(Error::InvalidOperation(
                    "The operation has already completed",
                ));
            }

            *slot = Slot::Ready(result);
        }

        // Dropping the sender wakes every waiter.
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        Ok(())
    }

    /// Wait for the operation to complete and take its result.
    ///
    /// Fails with [`Error::InvalidOperation`] if the result has already been taken.
    pub async fn end(&self) -> Result<T> {
        let _ = self.done.recv_async().await;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => result,
            Slot::Taken => Err(Error::InvalidOperation(
                "The result has already been retrieved",
            )),
            Slot::Pending => {
                *slot = Slot::Pending;

                Err(Error::InvalidOperation("The operation has been abandoned"))
            }
        }
    }
}
