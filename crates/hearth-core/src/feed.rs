//! Bounded, de-duplicated list of recent detections, newest first.

use crate::types::DetectionEvent;
use std::collections::VecDeque;

/// Retention cap used when none is configured (matches `GET /events?limit=50`).
pub const DEFAULT_FEED_CAPACITY: usize = 50;

/// Newest-first feed keyed by event id.
///
/// Position is arrival order, not event timestamp: a push always lands on
/// top even if its timestamp is older than what is already shown.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFeed {
    events: VecDeque<DetectionEvent>,
    capacity: usize,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl EventFeed {
    /// A zero capacity is clamped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DetectionEvent> {
        self.events.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.events.iter()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.events.iter().map(|e| e.id).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Replace the whole feed with a bootstrap batch (already newest first).
    ///
    /// Duplicate ids keep their first, newest, position.
    pub fn replace(&mut self, batch: Vec<DetectionEvent>) {
        self.events.clear();
        for event in batch {
            if self.events.len() == self.capacity {
                break;
            }
            if self.events.iter().any(|e| e.id == event.id) {
                continue;
            }
            self.events.push_back(event);
        }
    }

    /// Put a pushed event on top, dropping any older entry with the same id
    /// and trimming to capacity.
    pub fn push_front(&mut self, event: DetectionEvent) {
        self.events.retain(|e| e.id != event.id);
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }
}
