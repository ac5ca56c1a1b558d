//! Per-subscriber message cache
//!
//! Holds events that could not be delivered live. Bounded in size with FIFO
//! eviction; drained in insertion order when a channel reconnects.

use crate::channel::{Delivery, EventSender};
use crate::events::NotificationEvent;
use std::collections::VecDeque;

/// Outcome of draining the cache into a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    /// Events handed to the channel
    pub delivered: usize,
    /// Events left in the cache
    pub remaining: usize,
}

/// Bounded FIFO of undelivered events
#[derive(Debug, Clone)]
pub struct MessageCache {
    events: VecDeque<NotificationEvent>,
    max_size: usize,
}

impl MessageCache {
    /// Create an empty cache holding at most `max_size` events
    #[inline]
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_size.min(64)),
            max_size,
        }
    }

    /// Append an event, returning the oldest one if it had to be evicted
    ///
    /// With a zero-sized cache the pushed event itself is returned.
    pub fn push(&mut self, event: NotificationEvent) -> Option<NotificationEvent> {
        if self.max_size == 0 {
            return Some(event);
        }
        let evicted = if self.events.len() >= self.max_size {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Move cached events into `sender` in order
    ///
    /// Stops at the first event the channel refuses; that event and the rest
    /// stay cached, order intact.
    pub fn drain_into(&mut self, sender: &EventSender) -> DrainOutcome {
        let mut delivered = 0;
        while let Some(event) = self.events.pop_front() {
            match sender.try_deliver(event) {
                Delivery::Delivered => delivered += 1,
                Delivery::Full(event) | Delivery::Closed(event) => {
                    self.events.push_front(event);
                    break;
                }
            }
        }
        DrainOutcome {
            delivered,
            remaining: self.events.len(),
        }
    }

    /// Number of cached events
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if nothing is cached
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured bound
    #[inline]
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Cached events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &NotificationEvent> {
        self.events.iter()
    }
}
