use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{Message, ObservationToken, bus::Shared};

/// Pull-based subscription to one message channel.
///
/// Returned by [`MessageBus::messages`](crate::MessageBus::messages) and
/// [`messages_of`](crate::MessageBus::messages_of). Each matching post
/// yields exactly one element, in post order; the buffer between posts and
/// the consumer is unbounded, so awaiting the next element is the only
/// suspension point.
///
/// Cancellation is structural: drop the stream (end the loop, leave the
/// scope) and the subscription is deregistered from the bus. Elements
/// posted after the drop are never buffered.
///
/// ```rust,no_run
/// # use tannoy::{Delivery, Message, MessageBus, MessageKey, NoSender};
/// # #[derive(Clone, Debug)]
/// # struct Tick;
/// # impl Message for Tick {
/// #     type Sender = NoSender;
/// #     const DELIVERY: Delivery = Delivery::Unpinned;
/// # }
/// # static TICK: MessageKey<Tick> = MessageKey::new();
/// # async fn demo(bus: MessageBus) {
/// let mut ticks = bus.messages(&TICK);
/// while let Some(tick) = ticks.recv().await {
///     println!("{tick:?}");
/// }
/// # }
/// ```
pub struct MessageStream<M: Message> {
    inner: UnboundedReceiverStream<M>,
    backlog: Arc<AtomicUsize>,
    token: ObservationToken,
    bus: Arc<Shared>,
}

impl<M: Message> MessageStream<M> {
    pub(crate) fn new(
        inner: UnboundedReceiverStream<M>,
        backlog: Arc<AtomicUsize>,
        token: ObservationToken,
        bus: Arc<Shared>,
    ) -> Self {
        Self {
            inner,
            backlog,
            token,
            bus,
        }
    }

    /// Receive the next matching message, suspending until one is posted.
    ///
    /// Returns `None` once the channel can produce no further elements.
    pub async fn recv(&mut self) -> Option<M> {
        self.next().await
    }
}

impl<M: Message> Stream for MessageStream<M> {
    type Item = M;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<M>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(_)) = &poll {
            this.backlog.fetch_sub(1, Ordering::Relaxed);
        }
        poll
    }
}

impl<M: Message> Drop for MessageStream<M> {
    fn drop(&mut self) {
        self.bus.remove(self.token);
    }
}

impl<M: Message> fmt::Debug for MessageStream<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("token", &self.token)
            .field("backlog", &self.backlog.load(Ordering::Relaxed))
            .finish()
    }
}
