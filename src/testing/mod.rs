//! Test harness for observing deliveries.
//!
//! Enable with the `test-harness` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tannoy = { version = "0.1", features = ["test-harness"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tannoy::testing::Recorder;
//!
//! let bus = MessageBus::new();
//! let recorder = Recorder::attach(&bus, &COUNT_DID_UPDATE);
//!
//! bus.post(&COUNT_DID_UPDATE, CountDidUpdate { count: 1 });
//! recorder.settle(Duration::from_secs(1)).await?;
//!
//! assert_eq!(recorder.count(), 1);
//! assert_eq!(recorder.received()[0].count, 1);
//! ```

mod recorder;

pub use recorder::Recorder;
