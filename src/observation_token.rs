use std::{fmt, hash};
use uuid::Uuid;

/// Handle for one live callback subscription.
///
/// Returned by [`MessageBus::add_observer`](crate::MessageBus::add_observer)
/// and [`add_observer_of`](crate::MessageBus::add_observer_of). Holding the
/// token is the only way to cancel the subscription later; present it to
/// [`remove_observer`](crate::MessageBus::remove_observer) when the owning
/// scope ends. A token that was already removed (or belongs to another bus)
/// is silently ignored there.
///
/// Losing a token without removing it leaves the subscription delivering
/// until process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, hash::Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservationToken(u128);

impl ObservationToken {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for ObservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        assert_ne!(ObservationToken::new(), ObservationToken::new());
    }
}
