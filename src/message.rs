use std::fmt;

/// Contract for payload types carried by the bus.
///
/// Implement this for each message type (usually a small struct). Messages
/// must be `Send + Sync + Clone + 'static` because they:
/// - Are cloned once per matching subscription (fan-out)
/// - Cross task boundaries into the pinned dispatcher and stream consumers (Send, 'static)
/// - May be inspected concurrently by several subscribers (Sync)
///
/// The two associated items fix, by declaration, the properties the bus
/// routes on:
/// - [`Sender`](Self::Sender) constrains who may be named as the sender of a
///   post. Use [`NoSender`] for messages that never carry one.
/// - [`DELIVERY`](Self::DELIVERY) picks the delivery discipline. A payload
///   type belongs to exactly one discipline; it cannot be posted under both.
///
/// # Example
///
/// ```rust
/// use tannoy::{Delivery, Message, NoSender};
///
/// #[derive(Clone, Debug)]
/// struct CountDidUpdate {
///     count: i64,
/// }
///
/// impl Message for CountDidUpdate {
///     type Sender = NoSender;
///     const DELIVERY: Delivery = Delivery::Pinned;
/// }
/// ```
pub trait Message: Send + Sync + Clone + 'static {
    /// The type a sender of this message must have.
    ///
    /// Subscriptions may filter on a specific sender instance (an
    /// `Arc<Self::Sender>`); posts may name one via
    /// [`MessageBus::post_from`](crate::MessageBus::post_from). Declare
    /// [`NoSender`] when the message is anonymous; the compiler then rules
    /// out sender-tagged posting and sender-filtered observation entirely.
    type Sender: Send + Sync + 'static;

    /// The delivery discipline every subscriber of this type is invoked under.
    const DELIVERY: Delivery;
}

/// How subscribers of a payload type are invoked.
///
/// | Discipline | Subscriber runs on | `post` returns |
/// |------------|--------------------|----------------|
/// | [`Pinned`](Self::Pinned) | the bus's single dispatcher task, in post order | after enqueueing (or after delivery, when already on the dispatcher) |
/// | [`Unpinned`](Self::Unpinned) | whatever context called `post`, inline | after every subscriber ran |
///
/// The discipline is a property of the payload type, not of individual
/// subscriptions: all subscribers of one message type share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Delivery {
    /// Deliver on the bus's designated dispatcher task.
    ///
    /// All pinned deliveries funnel through one FIFO queue, so subscribers
    /// observe posts in posting order and never run concurrently with each
    /// other. A post made from within a pinned subscriber is delivered
    /// synchronously, before that inner `post` returns.
    Pinned,

    /// Deliver inline, on the posting context.
    ///
    /// Subscribers run synchronously inside `post` with no context hop.
    /// Nothing is ordered relative to other concurrently posted messages.
    Unpinned,
}

impl Delivery {
    /// Returns `true` if this is the [`Pinned`](Self::Pinned) discipline.
    pub fn is_pinned(&self) -> bool {
        matches!(self, Delivery::Pinned)
    }

    /// Returns `true` if this is the [`Unpinned`](Self::Unpinned) discipline.
    pub fn is_unpinned(&self) -> bool {
        matches!(self, Delivery::Unpinned)
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Pinned => write!(f, "pinned"),
            Delivery::Unpinned => write!(f, "unpinned"),
        }
    }
}

/// Sender constraint for messages that never carry a sender.
///
/// `NoSender` has no values, so an `Arc<NoSender>` cannot exist: for a
/// message declaring `type Sender = NoSender`, the sender-taking halves of
/// the bus API ([`post_from`](crate::MessageBus::post_from),
/// [`add_observer_of`](crate::MessageBus::add_observer_of),
/// [`messages_of`](crate::MessageBus::messages_of)) are uncallable at
/// compile time. Such messages are posted plainly and match only
/// unfiltered subscriptions.
#[derive(Debug, Clone, Copy)]
pub enum NoSender {}
