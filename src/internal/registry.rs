use std::{any::Any, collections::HashMap, sync::Arc};

use crate::{Message, ObservationToken, internal::Subscription, message_key::KeyId};

#[cfg(feature = "serde")]
use crate::Delivery;

/// The bus's only shared mutable structure: key → live subscriptions, plus
/// a token index for cancellation. All access is serialized by the mutex in
/// `MessageBus`; post takes a snapshot under the lock and invokes outside
/// it, so subscribers may re-enter the bus freely.
pub(crate) struct Registry {
    channels: HashMap<KeyId, Box<dyn ChannelSlot>>,
    index: HashMap<ObservationToken, KeyId>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            channels: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn insert<M: Message>(&mut self, key: KeyId, subscription: Arc<Subscription<M>>) {
        self.index.insert(subscription.token(), key);
        let slot = self
            .channels
            .entry(key)
            .or_insert_with(|| Box::new(ChannelList::<M>::new()));
        slot.as_any_mut()
            .downcast_mut::<ChannelList<M>>()
            .expect("message key registered under two payload types")
            .entries
            .push(subscription);
    }

    /// Snapshot of the live entries under `key` that a post tagged with
    /// `sender` reaches, in registration order.
    pub(crate) fn matching<M: Message>(
        &self,
        key: KeyId,
        sender: Option<&Arc<M::Sender>>,
    ) -> Vec<Arc<Subscription<M>>> {
        let Some(slot) = self.channels.get(&key) else {
            return Vec::new();
        };
        let list = slot
            .as_any()
            .downcast_ref::<ChannelList<M>>()
            .expect("message key registered under two payload types");
        list.entries
            .iter()
            .filter(|s| s.is_live() && s.matches_sender(sender))
            .cloned()
            .collect()
    }

    /// Mark the subscription dead and evict it. Unknown tokens are ignored.
    pub(crate) fn remove(&mut self, token: ObservationToken) {
        let Some(key) = self.index.remove(&token) else {
            tracing::trace!(%token, "remove for unknown or already removed token ignored");
            return;
        };
        if let Some(slot) = self.channels.get_mut(&key) {
            slot.remove(token);
            if slot.is_empty() {
                self.channels.remove(&key);
            }
        }
        tracing::debug!(%token, key = %key, "subscription removed");
    }

    pub(crate) fn live_len(&self) -> usize {
        self.channels.values().map(|slot| slot.live_len()).sum()
    }

    #[cfg(feature = "serde")]
    pub(crate) fn summaries(&self) -> Vec<ChannelSummary> {
        let mut summaries: Vec<_> = self
            .channels
            .iter()
            .map(|(key, slot)| slot.summary(*key))
            .collect();
        summaries.sort_by_key(|s| s.key);
        summaries
    }
}

/// Type-erased slot for one channel. The concrete type is always the
/// `ChannelList<M>` of the key's payload type; the KeyId↔M association is
/// one-to-one by construction, which is what the downcasts above rely on.
trait ChannelSlot: Send {
    fn remove(&mut self, token: ObservationToken);
    fn live_len(&self) -> usize;
    fn is_empty(&self) -> bool;
    #[cfg(feature = "serde")]
    fn summary(&self, key: KeyId) -> ChannelSummary;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct ChannelList<M: Message> {
    entries: Vec<Arc<Subscription<M>>>,
}

impl<M: Message> ChannelList<M> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<M: Message> ChannelSlot for ChannelList<M> {
    fn remove(&mut self, token: ObservationToken) {
        if let Some(entry) = self.entries.iter().find(|s| s.token() == token) {
            entry.revoke();
        }
        self.entries.retain(|s| s.token() != token);
    }

    fn live_len(&self) -> usize {
        self.entries.iter().filter(|s| s.is_live()).count()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(feature = "serde")]
    fn summary(&self, key: KeyId) -> ChannelSummary {
        let live: Vec<_> = self.entries.iter().filter(|s| s.is_live()).collect();
        ChannelSummary {
            key,
            delivery: M::DELIVERY,
            callbacks: live.iter().filter(|s| !s.is_stream()).count(),
            streams: live.iter().filter(|s| s.is_stream()).count(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(feature = "serde")]
pub(crate) struct ChannelSummary {
    pub(crate) key: KeyId,
    pub(crate) delivery: Delivery,
    pub(crate) callbacks: usize,
    pub(crate) streams: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Delivery, MessageKey, NoSender};

    #[derive(Clone, Debug)]
    struct Ping;

    impl Message for Ping {
        type Sender = NoSender;
        const DELIVERY: Delivery = Delivery::Unpinned;
    }

    static PING: MessageKey<Ping> = MessageKey::new();
    static OTHER_PING: MessageKey<Ping> = MessageKey::new();

    fn noop_entry() -> Arc<Subscription<Ping>> {
        Arc::new(Subscription::callback(
            ObservationToken::new(),
            None,
            Box::new(|_| {}),
        ))
    }

    #[test]
    fn matching_returns_entries_in_registration_order() {
        let mut registry = Registry::new();
        let first = noop_entry();
        let second = noop_entry();
        registry.insert(PING.id(), first.clone());
        registry.insert(PING.id(), second.clone());

        let snapshot = registry.matching::<Ping>(PING.id(), None);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].token(), first.token());
        assert_eq!(snapshot[1].token(), second.token());
    }

    #[test]
    fn matching_is_scoped_to_one_key() {
        let mut registry = Registry::new();
        registry.insert(PING.id(), noop_entry());

        assert_eq!(registry.matching::<Ping>(OTHER_PING.id(), None).len(), 0);
    }

    #[test]
    fn remove_revokes_and_evicts() {
        let mut registry = Registry::new();
        let entry = noop_entry();
        registry.insert(PING.id(), entry.clone());

        registry.remove(entry.token());
        assert!(!entry.is_live());
        assert_eq!(registry.live_len(), 0);
        assert!(registry.matching::<Ping>(PING.id(), None).is_empty());
    }

    #[test]
    fn remove_is_idempotent_for_unknown_tokens() {
        let mut registry = Registry::new();
        let entry = noop_entry();
        registry.insert(PING.id(), entry.clone());

        registry.remove(entry.token());
        registry.remove(entry.token());
        registry.remove(ObservationToken::new());
        assert_eq!(registry.live_len(), 0);
    }

    #[test]
    fn snapshot_taken_before_removal_still_delivers_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let entry = Arc::new(Subscription::callback(
            ObservationToken::new(),
            None,
            Box::new(move |_: Ping| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let mut registry = Registry::new();
        registry.insert(PING.id(), entry.clone());
        let snapshot = registry.matching::<Ping>(PING.id(), None);

        // In-flight delivery may complete; later ones must not start.
        for sub in &snapshot {
            sub.deliver(Ping);
        }
        registry.remove(entry.token());
        for sub in &snapshot {
            sub.deliver(Ping);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
