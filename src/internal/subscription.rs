use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tokio::sync::mpsc::UnboundedSender;

use crate::{Message, ObservationToken};

/// One live interest registration.
///
/// Shared between the registry and any in-flight delivery snapshot. The
/// liveness flag is the cancellation point: removal flips it before the
/// entry is evicted, and every delivery re-checks it first, so a
/// subscription never receives a message after its removal completed. A
/// delivery that already started when removal began may still finish.
pub(crate) struct Subscription<M: Message> {
    token: ObservationToken,
    filter: Option<Weak<M::Sender>>,
    live: AtomicBool,
    target: Target<M>,
}

enum Target<M: Message> {
    Callback(Box<dyn Fn(M) + Send + Sync>),
    Stream {
        tx: UnboundedSender<M>,
        backlog: Arc<AtomicUsize>,
        warn_depth: usize,
        warned: AtomicBool,
    },
}

impl<M: Message> Subscription<M> {
    pub(crate) fn callback(
        token: ObservationToken,
        filter: Option<Weak<M::Sender>>,
        observer: Box<dyn Fn(M) + Send + Sync>,
    ) -> Self {
        Self {
            token,
            filter,
            live: AtomicBool::new(true),
            target: Target::Callback(observer),
        }
    }

    pub(crate) fn stream(
        token: ObservationToken,
        filter: Option<Weak<M::Sender>>,
        tx: UnboundedSender<M>,
        backlog: Arc<AtomicUsize>,
        warn_depth: usize,
    ) -> Self {
        Self {
            token,
            filter,
            live: AtomicBool::new(true),
            target: Target::Stream {
                tx,
                backlog,
                warn_depth,
                warned: AtomicBool::new(false),
            },
        }
    }

    pub(crate) fn token(&self) -> ObservationToken {
        self.token
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn revoke(&self) {
        self.live.store(false, Ordering::Release);
    }

    #[cfg(feature = "serde")]
    pub(crate) fn is_stream(&self) -> bool {
        matches!(self.target, Target::Stream { .. })
    }

    /// Whether a post tagged with `sender` (or untagged) reaches this entry.
    ///
    /// An unfiltered entry matches everything. A filtered entry matches by
    /// allocation identity of the registered `Arc`; the `Weak` keeps the
    /// allocation alive, so the pointer can never be reused by a new sender.
    pub(crate) fn matches_sender(&self, sender: Option<&Arc<M::Sender>>) -> bool {
        match (&self.filter, sender) {
            (None, _) => true,
            (Some(filter), Some(sender)) => std::ptr::eq(filter.as_ptr(), Arc::as_ptr(sender)),
            (Some(_), None) => false,
        }
    }

    pub(crate) fn deliver(&self, message: M) {
        if !self.is_live() {
            return;
        }
        match &self.target {
            Target::Callback(observer) => observer(message),
            Target::Stream {
                tx,
                backlog,
                warn_depth,
                warned,
            } => {
                if tx.send(message).is_err() {
                    // Receiver already dropped; its Drop will evict us shortly.
                    self.revoke();
                    tracing::trace!(token = %self.token, "stream receiver gone, marking subscription dead");
                    return;
                }
                let depth = backlog.fetch_add(1, Ordering::Relaxed) + 1;
                if depth >= *warn_depth && !warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        token = %self.token,
                        depth,
                        "stream subscriber is falling behind; its unbounded backlog keeps growing"
                    );
                }
            }
        }
    }
}
