//! Lifecycle event bus for the Media Replay Engine.
//!
//! This crate provides:
//! - Publishing lifecycle events to a Redis stream
//! - Consumer-group delivery with ack, retry counting and a dead-letter stream
//! - An in-memory bus for tests and local runs

pub mod bus;
pub mod error;
pub mod memory;

pub use bus::{Delivery, EventBusConfig, LifecycleEventBus, RedisEventBus};
pub use error::{EventError, EventResult};
pub use memory::MemoryEventBus;
