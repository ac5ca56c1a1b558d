//! Notification stream consumer loop
//!
//! One stream per live connection. It greets with `connected`, then yields
//! events from its channel, or a heartbeat whenever the channel stays idle
//! for the configured interval. Dropping the stream disconnects the channel.

use crate::channel::{ChannelId, EventReceiver, RecvOutcome};
use crate::events::NotificationEvent;
use crate::hub::NotificationHub;
use crate::types::SubscriberId;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Removes the channel from the hub when the connection goes away
#[derive(Debug)]
struct DisconnectGuard {
    hub: Arc<NotificationHub>,
    subscriber: SubscriberId,
    channel: ChannelId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.hub.disconnect(self.subscriber, self.channel);
    }
}

struct LoopState {
    receiver: EventReceiver,
    heartbeat: Duration,
    greeting: Option<NotificationEvent>,
    guard: DisconnectGuard,
}

/// Live notification stream for one connection
pub struct NotificationStream {
    subscriber: SubscriberId,
    channel: ChannelId,
    inner: BoxStream<'static, NotificationEvent>,
}

impl NotificationStream {
    /// Connect `subscriber` to `hub` and build the stream
    #[must_use]
    pub fn open(hub: Arc<NotificationHub>, subscriber: SubscriberId) -> Self {
        let heartbeat = hub.config().heartbeat_interval();
        let receiver = hub.connect(subscriber);
        let channel = receiver.id();

        let state = LoopState {
            receiver,
            heartbeat,
            greeting: Some(NotificationEvent::connected(subscriber)),
            guard: DisconnectGuard {
                hub,
                subscriber,
                channel,
            },
        };

        let inner = stream::unfold(state, |mut state| async move {
            if let Some(greeting) = state.greeting.take() {
                return Some((greeting, state));
            }
            match state.receiver.recv_timeout(state.heartbeat).await {
                RecvOutcome::Event(event) => Some((event, state)),
                RecvOutcome::TimedOut => Some((NotificationEvent::heartbeat(), state)),
                RecvOutcome::Closed => {
                    tracing::debug!(
                        subscriber = %state.guard.subscriber,
                        channel = %state.guard.channel,
                        "notification channel closed by hub"
                    );
                    None
                }
            }
        })
        .boxed();

        Self {
            subscriber,
            channel,
            inner,
        }
    }

    /// Stream owner
    #[inline]
    #[must_use]
    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }

    /// Underlying channel
    #[inline]
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

impl std::fmt::Debug for NotificationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStream")
            .field("subscriber", &self.subscriber)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Stream for NotificationStream {
    type Item = NotificationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::events::EventKind;
    use crate::types::TaskId;

    fn hub() -> Arc<NotificationHub> {
        Arc::new(NotificationHub::new(HubConfig::default()))
    }

    #[tokio::test]
    async fn greets_before_anything_else() {
        let hub = hub();
        let alice = SubscriberId(3);
        hub.publish(
            alice,
            EventKind::TaskStarted {
                task_id: TaskId::new(),
                task_type: "cached".to_string(),
            },
        );

        let mut stream = NotificationStream::open(Arc::clone(&hub), alice);
        assert_eq!(stream.next().await.unwrap().event_type(), "connected");
        assert_eq!(stream.next().await.unwrap().event_type(), "task_started");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_emits_heartbeat() {
        let hub = hub();
        let mut stream = NotificationStream::open(hub, SubscriberId(3));
        stream.next().await.unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type(), "heartbeat");
    }

    #[tokio::test]
    async fn dropping_stream_disconnects_once() {
        let hub = hub();
        let alice = SubscriberId(3);
        let stream = NotificationStream::open(Arc::clone(&hub), alice);
        assert_eq!(hub.channel_count(alice), 1);

        let channel = stream.channel();
        drop(stream);
        assert_eq!(hub.channel_count(alice), 0);
        assert!(!hub.disconnect(alice, channel));
    }

    #[tokio::test]
    async fn idle_stream_wakes_on_publish() {
        let hub = hub();
        let alice = SubscriberId(3);
        let mut stream = tokio_test::task::spawn(NotificationStream::open(Arc::clone(&hub), alice));

        assert!(matches!(stream.poll_next(), Poll::Ready(Some(_))));
        tokio_test::assert_pending!(stream.poll_next());

        hub.publish(
            alice,
            EventKind::TaskStarted {
                task_id: TaskId::new(),
                task_type: "live".to_string(),
            },
        );
        assert!(stream.is_woken());
        match stream.poll_next() {
            Poll::Ready(Some(event)) => assert_eq!(event.event_type(), "task_started"),
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hub_reset_ends_stream() {
        let hub = hub();
        let mut stream = NotificationStream::open(Arc::clone(&hub), SubscriberId(3));
        stream.next().await.unwrap();

        hub.reset();
        assert!(stream.next().await.is_none());
    }
}
