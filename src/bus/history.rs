//! Bounded event history

use super::event::GlobalEvent;
use std::collections::VecDeque;

/// Ring buffer of processed events; the oldest event is evicted on overflow
#[derive(Debug, Clone)]
pub struct EventHistory {
    capacity: usize,
    events: VecDeque<GlobalEvent>,
}

impl EventHistory {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append an event, returning the evicted one if the buffer was full
    pub fn push(&mut self, event: GlobalEvent) -> Option<GlobalEvent> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
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

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &GlobalEvent> {
        self.events.iter()
    }

    /// The last `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<GlobalEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Find an event by id
    pub fn get(&self, id: &str) -> Option<&GlobalEvent> {
        self.events.iter().find(|e| e.id == id)
    }
}
