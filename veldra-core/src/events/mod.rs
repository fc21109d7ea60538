//! Event-driven communication substrate for plugins.
//!
//! Provides:
//! - Type-keyed and wildcard publish/subscribe with asynchronous dispatch
//! - A bounded dead-letter queue for failed handler invocations
//! - An append-only JSONL persistence log with replay

pub mod bus;
pub mod dlq;
pub mod error;
pub mod event;
pub mod persistence;

pub use bus::{EventBus, EventHandler, WILDCARD};
pub use dlq::{DeadLetterQueue, FailedEvent, DEFAULT_DLQ_MAX_SIZE};
pub use error::{EventError, EventResult};
pub use event::{Event, EventBuilder};
pub use persistence::EventPersistence;
