//! In-process event bus that records what was published.

use std::sync::Mutex;

use async_trait::async_trait;
use mre_models::{LifecycleEvent, LifecycleState};

use crate::bus::LifecycleEventBus;
use crate::error::{EventError, EventResult};

#[derive(Debug, Default)]
pub struct MemoryEventBus {
    published: Mutex<Vec<LifecycleEvent>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, oldest first.
    pub fn published(&self) -> Vec<LifecycleEvent> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Published events in the given state.
    pub fn with_state(&self, state: LifecycleState) -> Vec<LifecycleEvent> {
        self.published()
            .into_iter()
            .filter(|e| e.state == state)
            .collect()
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<LifecycleEvent> {
        self.published
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

#[async_trait]
impl LifecycleEventBus for MemoryEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> EventResult<String> {
        let mut events = self
            .published
            .lock()
            .map_err(|_| EventError::publish_failed("event log lock poisoned"))?;
        events.push(event.clone());
        Ok(format!("{}-0", events.len()))
    }
}
