//! Counter Example
//!
//! A producer posts two messages every time a counter changes:
//!
//! - `CountDidUpdate` is **pinned**: its observer always runs on the bus's
//!   dispatcher task, and sees updates in posting order.
//! - `CountDidUpdateBackground` is **unpinned**: consumed here through a
//!   pull-based stream on a separate task.
//!
//! The callback observer holds its `ObservationToken` and removes it on
//! teardown; the stream consumer is cancelled structurally by aborting the
//! task that owns the stream.

use std::time::Duration;

use tannoy::{Delivery, Message, MessageBus, MessageKey, NoSender};

/// Delivered on the bus's pinned dispatcher.
#[derive(Clone, Debug)]
struct CountDidUpdate {
    count: i64,
}

impl Message for CountDidUpdate {
    type Sender = NoSender;
    const DELIVERY: Delivery = Delivery::Pinned;
}

/// Delivered inline, wherever the post happens.
#[derive(Clone, Debug)]
struct CountDidUpdateBackground {
    count: i64,
}

impl Message for CountDidUpdateBackground {
    type Sender = NoSender;
    const DELIVERY: Delivery = Delivery::Unpinned;
}

static COUNT_DID_UPDATE: MessageKey<CountDidUpdate> = MessageKey::new();
static COUNT_DID_UPDATE_BACKGROUND: MessageKey<CountDidUpdateBackground> = MessageKey::new();

#[tokio::main]
async fn main() -> tannoy::Result {
    let bus = MessageBus::new();

    // Callback subscription: lives until the token is presented back.
    let token = bus.add_observer(&COUNT_DID_UPDATE, |message| {
        println!("observer: count is now {}", message.count);
    });

    // Stream subscription: lives until the consuming task stops pulling.
    let mut background = bus.messages(&COUNT_DID_UPDATE_BACKGROUND);
    let consumer = tokio::spawn(async move {
        while let Some(message) = background.recv().await {
            println!("background: count received {}", message.count);
        }
    });

    let mut count = 50;
    for step in [1, 1, -1, 1] {
        count += step;
        bus.post(&COUNT_DID_UPDATE, CountDidUpdate { count });
        bus.post(
            &COUNT_DID_UPDATE_BACKGROUND,
            CountDidUpdateBackground { count },
        );
    }

    // Wait for the pinned deliveries, then tear both subscriptions down.
    bus.flush().await;
    bus.remove_observer(token);

    tokio::time::sleep(Duration::from_millis(10)).await;
    consumer.abort();

    bus.shutdown().await
}
