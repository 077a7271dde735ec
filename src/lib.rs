#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Tannoy
//!
//! A typed, discipline-aware in-process message bus for Tokio.
//!
//! Tannoy replaces stringly-typed notification names and userInfo
//! dictionaries with strongly-typed message channels: each message kind is
//! a plain Rust type plus one declared [`MessageKey`], and the compiler
//! checks every post and subscription against it. Subscribers choose
//! between callbacks with an explicit cancellation token and pull-based
//! async streams.
//!
//! ## Quick Start
//!
//! ```rust
//! use tannoy::{Delivery, Message, MessageBus, MessageKey, NoSender};
//!
//! #[derive(Clone, Debug)]
//! struct CountDidUpdate {
//!     count: i64,
//! }
//!
//! impl Message for CountDidUpdate {
//!     type Sender = NoSender;
//!     const DELIVERY: Delivery = Delivery::Unpinned;
//! }
//!
//! static COUNT_DID_UPDATE: MessageKey<CountDidUpdate> = MessageKey::new();
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!
//!     let token = bus.add_observer(&COUNT_DID_UPDATE, |message| {
//!         println!("count is now {}", message.count);
//!     });
//!
//!     let mut updates = bus.messages(&COUNT_DID_UPDATE);
//!     bus.post(&COUNT_DID_UPDATE, CountDidUpdate { count: 1 });
//!
//!     assert_eq!(updates.recv().await.map(|m| m.count), Some(1));
//!     bus.remove_observer(token);
//! }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Trait declaring a payload type's sender constraint and delivery discipline |
//! | [`MessageKey`] | Declared-once identity of a message channel (the routing key) |
//! | [`Delivery`] | The two delivery disciplines: `Pinned` and `Unpinned` |
//! | [`MessageBus`] | The registry: post, observe, cancel, stream |
//! | [`ObservationToken`] | Handle for cancelling one callback subscription |
//! | [`MessageStream`] | Pull-based subscription; drop it to cancel |
//! | [`Config`] | Construction-time knobs |
//!
//! ## Delivery Disciplines
//!
//! Every payload type declares one discipline, checked at the `post` site:
//!
//! - **Pinned** - subscribers run on the bus's single dispatcher task, in
//!   posting order. `post` enqueues and returns; a post made from within a
//!   pinned subscriber delivers synchronously instead. Use this for state
//!   that must only ever be touched from one logical context.
//! - **Unpinned** - subscribers run inline on whatever context called
//!   `post`, which returns after the last one. No ordering exists relative
//!   to other concurrently posted messages.
//!
//! ## Channel Identity
//!
//! Routing is by declared [`MessageKey`] instance, never by payload shape:
//! two modules that each declare a key over the same payload type own two
//! isolated channels. Misdelivery across structurally identical messages
//! cannot happen.
//!
//! ## Features
//!
//! - **`serde`** - serde derives on the id types and a
//!   `MessageBus::to_json` topology export
//! - **`test-harness`** - a `testing::Recorder` for recording and awaiting
//!   deliveries in tests

mod bus;
mod config;
mod error;
mod message;
mod message_key;
mod observation_token;
mod stream;

mod internal;

#[cfg(feature = "test-harness")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-harness")))]
pub mod testing;

pub use bus::MessageBus;
pub use config::Config;
pub use error::Error;
pub use message::{Delivery, Message, NoSender};
pub use message_key::{KeyId, MessageKey};
pub use observation_token::ObservationToken;
pub use stream::MessageStream;

/// Convenience alias for `Result<T, tannoy::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
