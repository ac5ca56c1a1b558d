//! Bounded per-connection event channel
//!
//! Publishers never block: `try_deliver` reports whether the event landed,
//! the channel was full, or the reading side is gone. The reader waits with a
//! bound so the stream loop can emit heartbeats.

use crate::events::NotificationEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug)]
pub enum Delivery {
    /// Event is queued on the channel
    Delivered,
    /// Channel at capacity; the event is handed back
    Full(NotificationEvent),
    /// Reader dropped; the event is handed back
    Closed(NotificationEvent),
}

/// Result of a bounded wait on the reader side
#[derive(Debug)]
pub enum RecvOutcome {
    /// An event arrived
    Event(NotificationEvent),
    /// Nothing arrived within the wait
    TimedOut,
    /// Every sender is gone
    Closed,
}

/// Publishing half, held by the hub
#[derive(Debug, Clone)]
pub struct EventSender {
    id: ChannelId,
    tx: mpsc::Sender<NotificationEvent>,
}

impl EventSender {
    /// Channel identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Enqueue without waiting
    pub fn try_deliver(&self, event: NotificationEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(event)) => Delivery::Full(event),
            Err(TrySendError::Closed(event)) => Delivery::Closed(event),
        }
    }

    /// Check if the reader is gone
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading half, held by one stream connection
#[derive(Debug)]
pub struct EventReceiver {
    id: ChannelId,
    rx: mpsc::Receiver<NotificationEvent>,
}

impl EventReceiver {
    /// Channel identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Wait at most `wait` for the next event
    pub async fn recv_timeout(&mut self, wait: Duration) -> RecvOutcome {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(event)) => RecvOutcome::Event(event),
            Ok(None) => RecvOutcome::Closed,
            Err(_) => RecvOutcome::TimedOut,
        }
    }

    /// Take an already-queued event, if any
    pub fn try_recv(&mut self) -> Option<NotificationEvent> {
        self.rx.try_recv().ok()
    }
}

/// Create a bounded channel
///
/// `capacity` must be non-zero; configuration validation guarantees this
/// for channels created by the hub.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let id = ChannelId::next();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { id, tx }, EventReceiver { id, rx })
}
