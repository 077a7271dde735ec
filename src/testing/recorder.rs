use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::time::{Instant, sleep};

use crate::{Error, Message, MessageBus, MessageKey, ObservationToken, Result};

/// Records every delivery on one channel, in arrival order.
///
/// A `Recorder` is an ordinary callback subscription, so it works for both
/// disciplines: unpinned deliveries are recorded before `post` returns,
/// pinned ones once the dispatcher has run them (use [`settle`](Self::settle)
/// or [`MessageBus::flush`] to wait). Detaches from the bus on drop.
pub struct Recorder<M: Message> {
    entries: Arc<Mutex<Vec<M>>>,
    bus: MessageBus,
    token: ObservationToken,
}

impl<M: Message> Recorder<M> {
    /// Subscribe to `key` on `bus` and start recording.
    pub fn attach(bus: &MessageBus, key: &'static MessageKey<M>) -> Self {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();
        let token = bus.add_observer(key, move |message| {
            sink.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(message);
        });
        Self {
            entries,
            bus: bus.clone(),
            token,
        }
    }

    /// Number of deliveries recorded so far.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Everything recorded so far, in arrival order.
    pub fn received(&self) -> Vec<M> {
        self.lock().clone()
    }

    /// Wait until no new deliveries have arrived for a short quiet window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SettleTimeout`] if deliveries keep arriving past
    /// `timeout`.
    pub async fn settle(&self, timeout: Duration) -> Result {
        const QUIET: Duration = Duration::from_millis(10);
        const TICK: Duration = Duration::from_millis(1);

        let deadline = Instant::now() + timeout;
        let mut seen = self.count();
        let mut quiet_since = Instant::now();
        loop {
            sleep(TICK).await;
            let now = self.count();
            if now != seen {
                seen = now;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= QUIET {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::SettleTimeout(timeout, seen));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<M>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<M: Message> Drop for Recorder<M> {
    fn drop(&mut self) {
        self.bus.remove_observer(self.token);
    }
}
