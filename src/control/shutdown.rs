use std::sync::Arc;
use tokio::sync::watch;

/// Create a linked trigger/listener pair.
pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle(Arc::new(tx)), Shutdown(rx))
}

/// Requests a graceful stop. Cheap to clone and hand to signal handlers or
/// the DBus interface.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop has been requested or every handle is gone.
    pub async fn requested(&mut self) {
        loop {
            let stop = *self.0.borrow_and_update();
            if stop {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}
