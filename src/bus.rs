use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, Weak,
    atomic::AtomicUsize,
};

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    Config, Delivery, Error, Message, MessageKey, MessageStream, ObservationToken, Result,
    internal::{
        Registry, Subscription,
        dispatcher::{self, DispatcherId, Job},
    },
};

/// Typed publish/subscribe bus with two delivery disciplines.
///
/// # Posting
///
/// ```ignore
/// bus.post(&COUNT_DID_UPDATE, CountDidUpdate { count });
/// bus.post_from(&manager, &COUNT_DID_UPDATE, CountDidUpdate { count });
/// ```
///
/// The payload type's [`Message::DELIVERY`] decides what `post` does:
/// [`Unpinned`](Delivery::Unpinned) subscribers run inline before `post`
/// returns; [`Pinned`](Delivery::Pinned) subscribers are enqueued onto the
/// bus's single dispatcher task and run there in posting order (`post`
/// does not wait for them, unless it was itself called from the
/// dispatcher, in which case delivery happens synchronously). Posting with
/// zero subscribers is a no-op.
///
/// # Subscribing
///
/// - [`add_observer`](Self::add_observer) registers a callback and returns
///   an [`ObservationToken`]; pair every registration with a
///   [`remove_observer`](Self::remove_observer) on the owner's teardown
///   path, or the callback keeps firing until process exit.
/// - [`messages`](Self::messages) opens a [`MessageStream`]; dropping the
///   stream releases the subscription.
///
/// Fan-out is unbounded by choice: every matching subscription gets one
/// clone of each post, and a stream whose consumer is slow buffers without
/// bound (crossing [`Config::stream_warn_depth`] logs a warning once per
/// subscription).
///
/// # Sharing
///
/// `MessageBus` is a cheap clone handle over shared state. Components that
/// need the bus should receive a handle; [`global()`](Self::global) exists
/// for process-wide wiring and is initialized once on first access, which
/// must happen inside a Tokio runtime. Tests construct isolated instances
/// with [`new()`](Self::new) instead of sharing process state.
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<Shared>,
}

impl MessageBus {
    /// Create an isolated bus with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime (the pinned dispatcher
    /// task is spawned here).
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create an isolated bus with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let (pinned, jobs) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let dispatcher = DispatcherId::next();
        dispatcher::spawn(dispatcher, jobs, cancel.clone());
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::new()),
                pinned,
                dispatcher,
                cancel,
                config,
            }),
        }
    }

    /// The process-wide bus, created on first access.
    pub fn global() -> &'static MessageBus {
        static GLOBAL: OnceLock<MessageBus> = OnceLock::new();
        GLOBAL.get_or_init(MessageBus::new)
    }

    /// Post a message without a sender.
    ///
    /// All live subscriptions under `key` without a sender filter receive
    /// one clone each, per the payload type's delivery discipline.
    pub fn post<M: Message>(&self, key: &'static MessageKey<M>, message: M) {
        self.shared.deliver(key, None, message);
    }

    /// Post a message on behalf of `sender`.
    ///
    /// Reaches unfiltered subscriptions and those registered for this
    /// specific sender (same `Arc` allocation).
    pub fn post_from<M: Message>(
        &self,
        sender: &Arc<M::Sender>,
        key: &'static MessageKey<M>,
        message: M,
    ) {
        self.shared.deliver(key, Some(sender), message);
    }

    /// Register a callback for every post under `key`.
    ///
    /// The subscription is live when this returns; the call never blocks.
    /// The returned token is the only way to cancel it.
    pub fn add_observer<M, F>(&self, key: &'static MessageKey<M>, observer: F) -> ObservationToken
    where
        M: Message,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.shared.observe(key, None, Box::new(observer))
    }

    /// Register a callback for posts under `key` made by `sender`.
    ///
    /// The bus keeps only a weak reference to the sender; registration does
    /// not extend its lifetime.
    pub fn add_observer_of<M, F>(
        &self,
        sender: &Arc<M::Sender>,
        key: &'static MessageKey<M>,
        observer: F,
    ) -> ObservationToken
    where
        M: Message,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.shared
            .observe(key, Some(Arc::downgrade(sender)), Box::new(observer))
    }

    /// Cancel the callback subscription `token` identifies.
    ///
    /// Idempotent; unknown or already-removed tokens are ignored. After
    /// this returns, the callback receives no further posts (a delivery
    /// already in flight may still complete).
    pub fn remove_observer(&self, token: ObservationToken) {
        self.shared.remove(token);
    }

    /// Open a pull-based subscription to every post under `key`.
    ///
    /// Every call makes one independent subscription; concurrent streams
    /// on the same key each see every post. Drop the stream to cancel.
    pub fn messages<M: Message>(&self, key: &'static MessageKey<M>) -> MessageStream<M> {
        self.open_stream(key, None)
    }

    /// Open a pull-based subscription to posts under `key` made by `sender`.
    pub fn messages_of<M: Message>(
        &self,
        sender: &Arc<M::Sender>,
        key: &'static MessageKey<M>,
    ) -> MessageStream<M> {
        self.open_stream(key, Some(Arc::downgrade(sender)))
    }

    fn open_stream<M: Message>(
        &self,
        key: &'static MessageKey<M>,
        filter: Option<Weak<M::Sender>>,
    ) -> MessageStream<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let token = ObservationToken::new();
        let subscription = Arc::new(Subscription::stream(
            token,
            filter,
            tx,
            backlog.clone(),
            self.shared.config.stream_warn_depth(),
        ));
        self.shared.registry().insert(key.id(), subscription);
        tracing::debug!(%token, key = %key.id(), "stream subscription opened");
        MessageStream::new(
            UnboundedReceiverStream::new(rx),
            backlog,
            token,
            self.shared.clone(),
        )
    }

    /// Wait until every pinned delivery enqueued so far has run.
    ///
    /// Returns immediately when called from the pinned context itself, or
    /// when the bus is already shut down.
    pub async fn flush(&self) {
        if dispatcher::on_pinned_context(self.shared.dispatcher) {
            return;
        }
        self.shared.barrier().await;
    }

    /// Drain outstanding pinned deliveries, then stop the dispatcher.
    ///
    /// Posting afterwards is a logged no-op for both disciplines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusClosed`] if the bus was already shut down.
    pub async fn shutdown(&self) -> Result {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::BusClosed);
        }
        self.shared.barrier().await;
        self.shared.cancel.cancel();
        Ok(())
    }

    /// Number of live subscriptions, across all keys and both styles.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().live_len()
    }

    /// Export the current channel topology as JSON.
    ///
    /// One entry per key with live subscriptions: its id, delivery
    /// discipline, and live callback/stream counts. Reflects registration
    /// state only, not message flow.
    ///
    /// # Errors
    ///
    /// Returns any serialization error produced by `serde_json`.
    #[cfg(feature = "serde")]
    #[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
    pub fn to_json(&self) -> serde_json::Result<String> {
        use serde::Serialize;

        #[derive(Serialize)]
        struct ChannelExport {
            key: u64,
            delivery: String,
            callbacks: usize,
            streams: usize,
        }

        let exports: Vec<ChannelExport> = self
            .shared
            .registry()
            .summaries()
            .into_iter()
            .map(|summary| ChannelExport {
                key: summary.key.value(),
                delivery: summary.delivery.to_string(),
                callbacks: summary.callbacks,
                streams: summary.streams,
            })
            .collect();
        serde_json::to_string_pretty(&exports)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.shared.cancel.is_cancelled())
            .finish()
    }
}

pub(crate) struct Shared {
    registry: Mutex<Registry>,
    pinned: mpsc::UnboundedSender<Job>,
    dispatcher: DispatcherId,
    cancel: CancellationToken,
    config: Config,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn remove(&self, token: ObservationToken) {
        self.registry().remove(token);
    }

    fn observe<M: Message>(
        &self,
        key: &'static MessageKey<M>,
        filter: Option<Weak<M::Sender>>,
        observer: Box<dyn Fn(M) + Send + Sync>,
    ) -> ObservationToken {
        let token = ObservationToken::new();
        let subscription = Arc::new(Subscription::callback(token, filter, observer));
        self.registry().insert(key.id(), subscription);
        tracing::debug!(%token, key = %key.id(), "observer registered");
        token
    }

    fn deliver<M: Message>(
        &self,
        key: &'static MessageKey<M>,
        sender: Option<&Arc<M::Sender>>,
        message: M,
    ) {
        if self.cancel.is_cancelled() {
            tracing::warn!(key = %key.id(), "post on a shut down bus dropped");
            return;
        }

        // Snapshot under the lock, invoke outside it: subscribers may
        // re-enter the bus.
        let snapshot = self.registry().matching::<M>(key.id(), sender);
        if snapshot.is_empty() {
            tracing::trace!(key = %key.id(), "post with no matching subscriptions");
            return;
        }

        match M::DELIVERY {
            Delivery::Unpinned => {
                for subscription in &snapshot {
                    subscription.deliver(message.clone());
                }
            }
            Delivery::Pinned if dispatcher::on_pinned_context(self.dispatcher) => {
                for subscription in &snapshot {
                    subscription.deliver(message.clone());
                }
            }
            Delivery::Pinned => {
                let job: Job = Box::new(move || {
                    for subscription in &snapshot {
                        subscription.deliver(message.clone());
                    }
                });
                if self.pinned.send(job).is_err() {
                    tracing::warn!(key = %key.id(), "pinned dispatcher gone, dropping message");
                }
            }
        }
    }

    async fn barrier(&self) {
        let (done, observed) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = done.send(());
        });
        if self.pinned.send(job).is_ok() {
            let _ = observed.await;
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use futures_util::FutureExt;

    use super::*;
    use crate::NoSender;

    #[derive(Clone, Debug, PartialEq)]
    struct Tick(u32);

    impl Message for Tick {
        type Sender = NoSender;
        const DELIVERY: Delivery = Delivery::Unpinned;
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Frame(u32);

    impl Message for Frame {
        type Sender = NoSender;
        const DELIVERY: Delivery = Delivery::Pinned;
    }

    #[derive(Clone, Debug)]
    struct Pulse;

    impl Message for Pulse {
        type Sender = NoSender;
        const DELIVERY: Delivery = Delivery::Pinned;
    }

    struct Meter;

    #[derive(Clone, Debug, PartialEq)]
    struct Reading(u32);

    impl Message for Reading {
        type Sender = Meter;
        const DELIVERY: Delivery = Delivery::Unpinned;
    }

    static TICK: MessageKey<Tick> = MessageKey::new();
    static TICK_ALIAS: MessageKey<Tick> = MessageKey::new();
    static FRAME: MessageKey<Frame> = MessageKey::new();
    static PULSE: MessageKey<Pulse> = MessageKey::new();
    static READING: MessageKey<Reading> = MessageKey::new();

    fn counter(bus: &MessageBus, key: &'static MessageKey<Tick>) -> (ObservationToken, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let token = bus.add_observer(key, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        (token, hits)
    }

    #[tokio::test]
    async fn unpinned_delivery_is_synchronous_within_post() {
        let bus = MessageBus::new();
        let (_token, hits) = counter(&bus, &TICK);

        bus.post(&TICK, Tick(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_live_subscription_receives_exactly_once() {
        let bus = MessageBus::new();
        let (_a, hits_a) = counter(&bus, &TICK);
        let (_b, hits_b) = counter(&bus, &TICK);
        let mut stream = bus.messages(&TICK);

        bus.post(&TICK, Tick(7));

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
        assert_eq!(stream.recv().await, Some(Tick(7)));
        assert!(stream.recv().now_or_never().is_none());
    }

    #[tokio::test]
    async fn posting_with_zero_subscribers_is_a_noop() {
        let bus = MessageBus::new();
        bus.post(&TICK, Tick(1));
        bus.post(&FRAME, Frame(1));
        bus.flush().await;
    }

    #[tokio::test]
    async fn pinned_deliveries_arrive_in_post_order() {
        let bus = MessageBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let _token = bus.add_observer(&FRAME, move |frame: Frame| {
            sink.lock().unwrap().push(frame.0);
        });

        for n in 1..=5 {
            bus.post(&FRAME, Frame(n));
        }
        bus.flush().await;

        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn pinned_subscribers_run_in_registration_order() {
        let bus = MessageBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = log.clone();
        let second = log.clone();
        let _a = bus.add_observer(&FRAME, move |_| first.lock().unwrap().push("first"));
        let _b = bus.add_observer(&FRAME, move |_| second.lock().unwrap().push("second"));

        bus.post(&FRAME, Frame(1));
        bus.flush().await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn reentrant_pinned_post_delivers_before_returning() {
        let bus = MessageBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pulse_log = log.clone();
        let _pulse = bus.add_observer(&PULSE, move |_| pulse_log.lock().unwrap().push("pulse"));

        let frame_log = log.clone();
        let reposter = bus.clone();
        let _frame = bus.add_observer(&FRAME, move |_| {
            frame_log.lock().unwrap().push("frame-start");
            reposter.post(&PULSE, Pulse);
            frame_log.lock().unwrap().push("frame-end");
        });

        bus.post(&FRAME, Frame(1));
        bus.flush().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["frame-start", "pulse", "frame-end"]
        );
    }

    #[tokio::test]
    async fn pinned_posts_cross_buses_without_borrowing_the_wrong_dispatcher() {
        let bus = MessageBus::new();
        let other = MessageBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let other_log = log.clone();
        let _pulse = other.add_observer(&PULSE, move |_| other_log.lock().unwrap().push("pulse"));

        // A pinned callback on one bus posting to another bus must enqueue,
        // not deliver inline: only the posting bus's dispatcher is pinned.
        let frame_log = log.clone();
        let reposter = other.clone();
        let _frame = bus.add_observer(&FRAME, move |_| {
            frame_log.lock().unwrap().push("frame-start");
            reposter.post(&PULSE, Pulse);
            frame_log.lock().unwrap().push("frame-end");
        });

        bus.post(&FRAME, Frame(1));
        bus.flush().await;
        other.flush().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["frame-start", "frame-end", "pulse"]
        );
    }

    #[tokio::test]
    async fn remove_observer_is_idempotent_and_tolerates_unknown_tokens() {
        let bus = MessageBus::new();
        let other_bus = MessageBus::new();
        let (token, hits) = counter(&bus, &TICK);
        let (foreign, _) = counter(&other_bus, &TICK);

        bus.remove_observer(token);
        bus.remove_observer(token);
        bus.remove_observer(foreign);

        bus.post(&TICK, Tick(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn no_delivery_after_remove_observer_returns() {
        let bus = MessageBus::new();
        let (token, hits) = counter(&bus, &TICK);

        bus.post(&TICK, Tick(1));
        bus.remove_observer(token);
        bus.post(&TICK, Tick(2));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_sees_posts_in_order_and_stops_cleanly() {
        let bus = MessageBus::new();
        let mut stream = bus.messages(&TICK);

        for n in 1..=3 {
            bus.post(&TICK, Tick(n));
        }
        assert_eq!(stream.recv().await, Some(Tick(1)));
        assert_eq!(stream.recv().await, Some(Tick(2)));
        assert_eq!(stream.recv().await, Some(Tick(3)));

        drop(stream);
        assert_eq!(bus.subscriber_count(), 0);

        bus.post(&TICK, Tick(4));
        bus.post(&TICK, Tick(5));
    }

    #[tokio::test]
    async fn configured_warn_depth_does_not_change_delivery() {
        let bus = MessageBus::with_config(Config::default().with_stream_warn_depth(2));
        let mut stream = bus.messages(&TICK);

        for n in 1..=4 {
            bus.post(&TICK, Tick(n));
        }
        for n in 1..=4 {
            assert_eq!(stream.recv().await, Some(Tick(n)));
        }
    }

    #[tokio::test]
    async fn each_messages_call_is_an_independent_subscription() {
        let bus = MessageBus::new();
        let mut one = bus.messages(&TICK);
        let mut two = bus.messages(&TICK);

        bus.post(&TICK, Tick(9));

        assert_eq!(one.recv().await, Some(Tick(9)));
        assert_eq!(two.recv().await, Some(Tick(9)));
    }

    #[tokio::test]
    async fn separately_declared_keys_are_separate_channels() {
        let bus = MessageBus::new();
        let (_token, hits) = counter(&bus, &TICK_ALIAS);

        bus.post(&TICK, Tick(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.post(&TICK_ALIAS, Tick(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sender_filter_matches_by_identity() {
        let bus = MessageBus::new();
        let mine = Arc::new(Meter);
        let other = Arc::new(Meter);

        let filtered_hits = Arc::new(AtomicUsize::new(0));
        let sink = filtered_hits.clone();
        let _filtered = bus.add_observer_of(&mine, &READING, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let all_hits = Arc::new(AtomicUsize::new(0));
        let sink = all_hits.clone();
        let _all = bus.add_observer(&READING, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        bus.post_from(&other, &READING, Reading(1));
        assert_eq!(filtered_hits.load(Ordering::SeqCst), 0);

        bus.post(&READING, Reading(2));
        assert_eq!(filtered_hits.load(Ordering::SeqCst), 0);

        bus.post_from(&mine, &READING, Reading(3));
        assert_eq!(filtered_hits.load(Ordering::SeqCst), 1);

        assert_eq!(all_hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn filtered_stream_skips_other_senders() {
        let bus = MessageBus::new();
        let mine = Arc::new(Meter);
        let other = Arc::new(Meter);
        let mut readings = bus.messages_of(&mine, &READING);

        bus.post_from(&other, &READING, Reading(1));
        bus.post_from(&mine, &READING, Reading(2));

        assert_eq!(readings.recv().await, Some(Reading(2)));
    }

    #[tokio::test]
    async fn shutdown_drains_pinned_deliveries_first() {
        let bus = MessageBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let _token = bus.add_observer(&FRAME, move |frame: Frame| {
            sink.lock().unwrap().push(frame.0);
        });

        for n in 1..=3 {
            bus.post(&FRAME, Frame(n));
        }
        bus.shutdown().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(bus.shutdown().await, Err(Error::BusClosed));

        // Posts after shutdown are dropped for both disciplines.
        bus.post(&FRAME, Frame(4));
        bus.post(&TICK, Tick(1));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn observers_can_be_added_from_within_a_callback() {
        let bus = MessageBus::new();
        let late = Arc::new(AtomicUsize::new(0));

        let registrar = bus.clone();
        let sink = late.clone();
        let _token = bus.add_observer(&TICK, move |_| {
            let sink = sink.clone();
            registrar.add_observer(&TICK_ALIAS, move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.post(&TICK, Tick(1));
        bus.post(&TICK_ALIAS, Tick(2));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn global_bus_is_process_wide() {
        let first = MessageBus::global();
        let second = MessageBus::global();
        assert!(std::ptr::eq(first, second));
    }

    #[cfg(feature = "serde")]
    #[tokio::test]
    async fn to_json_reports_live_channels() {
        let bus = MessageBus::new();
        let (_token, _) = counter(&bus, &TICK);
        let _stream = bus.messages(&TICK);

        let json = bus.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["delivery"], "unpinned");
        assert_eq!(arr[0]["callbacks"], 1);
        assert_eq!(arr[0]["streams"], 1);
    }
}
