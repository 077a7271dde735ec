use std::{
    fmt, hash,
    marker::PhantomData,
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{Delivery, Message};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of one message channel.
///
/// A `MessageKey<M>` binds the payload type `M` to a unique routing key.
/// Declare one `static` per message kind and pass a reference to it to
/// every bus operation for that kind:
///
/// ```rust
/// use tannoy::{Delivery, Message, MessageKey, NoSender};
///
/// #[derive(Clone, Debug)]
/// struct CountDidUpdate {
///     count: i64,
/// }
///
/// impl Message for CountDidUpdate {
///     type Sender = NoSender;
///     const DELIVERY: Delivery = Delivery::Unpinned;
/// }
///
/// static COUNT_DID_UPDATE: MessageKey<CountDidUpdate> = MessageKey::new();
/// ```
///
/// Routing equality is the declared instance, never the payload shape: two
/// keys declared separately over the same payload type are two independent
/// channels, and subscribers of one never see posts under the other. This
/// keeps notification channels of unrelated modules isolated even when
/// their payloads happen to coincide.
///
/// Keys are immutable and expected to live for the whole process, which is
/// why the bus API takes `&'static MessageKey<M>`.
pub struct MessageKey<M: Message> {
    slot: OnceLock<u64>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message> MessageKey<M> {
    /// Create a key. `const`, so it can initialize a `static` directly.
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// The unique id of this key, minted on first use.
    pub fn id(&self) -> KeyId {
        KeyId(*self.slot.get_or_init(|| NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed)))
    }

    /// The delivery discipline of this key's payload type.
    pub fn delivery(&self) -> Delivery {
        M::DELIVERY
    }
}

impl<M: Message> Default for MessageKey<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> fmt::Debug for MessageKey<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKey")
            .field("id", &self.slot.get())
            .field("delivery", &M::DELIVERY)
            .finish()
    }
}

/// Opaque routing id minted for a declared [`MessageKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, hash::Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyId(u64);

impl KeyId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
