//! Deferred shutdown
//!
//! SIGINT / SIGTERM never kill the process directly: the handler records
//! the request, idle sleeps observe it immediately, and a unit of work
//! wrapped in [`ShutdownSignal::uninterruptible`] always runs to the end
//! before the loop gets a chance to stop.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    busy: AtomicBool,
    notify: Notify,
}

/// Shared shutdown flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the OS signal handlers on a background task
    pub fn listen(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to listen for shutdown signals: {}", e);
                return;
            }
            if signal.inner.busy.load(Ordering::SeqCst) {
                warn!("Shutdown requested, deferring until the current task finishes");
            } else {
                info!("Shutdown requested");
            }
            signal.request();
        });
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, returning early if shutdown is requested.
    ///
    /// Returns `true` when the full duration elapsed without a request.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_requested() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_requested(),
            _ = notified => false,
        }
    }

    /// Runs `work` to completion regardless of shutdown requests arriving
    /// meanwhile; the request stays pending for the caller to act on.
    pub async fn uninterruptible<F: Future>(&self, label: &str, work: F) -> F::Output {
        self.inner.busy.store(true, Ordering::SeqCst);
        let output = work.await;
        self.inner.busy.store(false, Ordering::SeqCst);

        if self.is_requested() {
            info!("{} finished, honouring pending shutdown", label);
        }
        output
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
