//! Inter-thread wake channel used by the daemon to tell a worker
//! "re-evaluate your state" (new connection available, shutdown
//! requested, a suspended connection resumed).
//!
//! On this runtime that primitive already exists natively as
//! [`tokio::sync::Notify`]: a single-permit, multi-waiter wake cell.
//! `Itc` is a thin newtype over it, kept as its own type so call sites
//! read in `notify`/`wait` vocabulary and so a future cross-process
//! backend could be swapped in behind the same interface.

use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub(crate) struct Itc(Arc<Notify>);

impl Itc {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    /// "Writes one byte": wakes exactly one waiter (or the next one to
    /// call `wait`, if none are currently waiting).
    pub(crate) fn notify(&self) {
        self.0.notify_one();
    }

    /// Wakes every current waiter; used for daemon-wide shutdown where
    /// every worker must observe the signal, not just one.
    pub(crate) fn notify_all(&self) {
        self.0.notify_waiters();
    }

    /// "Reads the pipe": waits for the next wake signal.
    pub(crate) async fn wait(&self) {
        self.0.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_wakes_waiter() {
        let itc = Itc::new();
        let waiter = itc.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        tokio::task::yield_now().await;
        itc.notify();
        handle.await.unwrap();
    }
}
