use std::sync::{Arc, Mutex};

use crate::{
    session::{event::Registry, Subscription},
    sync::lock,
    Error, Result,
};

type Closing = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Lifecycle {
    started: bool,
    disposed: bool,
}

/// A forwarded port, notifying its subscribers when it is closing.
///
/// Stopping the port tears down every tunnel bound to it.
#[derive(Clone, Default)]
pub struct Port {
    lifecycle: Arc<Mutex<Lifecycle>>,
    closing: Arc<Registry<Closing>>,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("started", &self.is_started())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Port {
    /// Create a stopped port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the port has been started and not stopped since.
    pub fn is_started(&self) -> bool {
        lock(&self.lifecycle).started
    }

    /// Whether the port has been disposed.
    pub fn is_disposed(&self) -> bool {
        lock(&self.lifecycle).disposed
    }

    /// Start the port, failing with [`Error::Disposed`] if it has been disposed.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.disposed {
            return Err(Error::Disposed);
        }

        lifecycle.started = true;

        Ok(())
    }

    /// Stop the port, raising the closing notification if it was started.
    pub fn stop(&self) {
        let started = std::mem::take(&mut lock(&self.lifecycle).started);

        if started {
            tracing::debug!("Forwarded port is closing");

            for listener in self.closing.snapshot() {
                listener();
            }
        }
    }

    /// Stop the port for good, any later [`Port::start`] fails.
    pub fn dispose(&self) {
        self.stop();

        lock(&self.lifecycle).disposed = true;
    }

    /// Be notified when the port is closing, until the [`Subscription`] is dropped.
    pub fn on_closing(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.closing.register(Arc::new(listener))
    }
}
