//! Notification hub
//!
//! Routes events to a subscriber's live channels, or caches them for later
//! delivery, and manages the connect/disconnect lifecycle:
//! - `Disconnected` (no channels, cache may hold entries)
//! - `Connected` (one or more channels)
//!
//! All state of one subscriber lives in a single map entry, so publish,
//! connect and disconnect for that subscriber are mutually exclusive while
//! different subscribers proceed in parallel.

use crate::cache::MessageCache;
use crate::channel::{event_channel, ChannelId, Delivery, EventReceiver, EventSender};
use crate::config::HubConfig;
use crate::events::{EventKind, NotificationEvent};
use crate::types::SubscriberId;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a publish call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOutcome {
    /// Live channels that accepted the event
    pub delivered: usize,
    /// Whether the event went to the cache
    pub cached: bool,
    /// Broken channels removed during the call
    pub pruned: usize,
}

/// Hub statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Subscribers with any state
    pub subscribers: usize,
    /// Live channels across all subscribers
    pub live_channels: usize,
    /// Cached events across all subscribers
    pub cached_events: usize,
}

#[derive(Debug)]
struct SubscriberSlot {
    channels: Vec<EventSender>,
    cache: MessageCache,
    /// Start of the current disconnected period
    disconnected_at: Option<Instant>,
}

impl SubscriberSlot {
    fn new(max_cache_size: usize) -> Self {
        Self {
            channels: Vec::new(),
            cache: MessageCache::new(max_cache_size),
            disconnected_at: None,
        }
    }

    fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        self.channels.is_empty()
            && self
                .disconnected_at
                .is_some_and(|at| now.saturating_duration_since(at) > retention)
    }
}

/// Routes events to live channels or the per-subscriber cache
#[derive(Debug)]
pub struct NotificationHub {
    config: HubConfig,
    slots: DashMap<SubscriberId, SubscriberSlot>,
}

impl NotificationHub {
    /// Create an empty hub
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
        }
    }

    /// Hub configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Open a new live channel for `subscriber`
    ///
    /// Expired caches are swept first. Anything still cached for this
    /// subscriber is drained into the new channel in order; whatever does not
    /// fit stays cached.
    pub fn connect(&self, subscriber: SubscriberId) -> EventReceiver {
        self.sweep_expired();

        let (sender, receiver) = event_channel(self.config.channel_capacity);
        let mut slot = self
            .slots
            .entry(subscriber)
            .or_insert_with(|| SubscriberSlot::new(self.config.max_cache_size));

        if !slot.cache.is_empty() {
            let drained = slot.cache.drain_into(&sender);
            tracing::info!(
                %subscriber,
                delivered = drained.delivered,
                remaining = drained.remaining,
                "replayed cached notifications"
            );
        }

        slot.channels.push(sender);
        slot.disconnected_at = None;
        tracing::info!(
            %subscriber,
            channel = %receiver.id(),
            connections = slot.channels.len(),
            "notification channel connected"
        );

        receiver
    }

    /// Remove a live channel
    ///
    /// Removing the last channel starts the cache retention clock. Returns
    /// `false` if the channel was not registered.
    pub fn disconnect(&self, subscriber: SubscriberId, channel: ChannelId) -> bool {
        let Some(mut slot) = self.slots.get_mut(&subscriber) else {
            tracing::debug!(%subscriber, %channel, "disconnect for unknown subscriber");
            return false;
        };

        let before = slot.channels.len();
        slot.channels.retain(|sender| sender.id() != channel);
        if slot.channels.len() == before {
            tracing::debug!(%subscriber, %channel, "disconnect for unknown channel");
            return false;
        }

        if slot.channels.is_empty() {
            slot.disconnected_at = Some(Instant::now());
        }
        tracing::info!(
            %subscriber,
            %channel,
            remaining = slot.channels.len(),
            "notification channel closed"
        );
        true
    }

    /// Send an event to every live channel of `subscriber`
    ///
    /// With no live channels the event is cached. A full channel keeps its
    /// place and the event is cached once for the whole call; a closed
    /// channel is pruned. Never fails from the publisher's point of view.
    pub fn publish(&self, subscriber: SubscriberId, kind: EventKind) -> PublishOutcome {
        let event = NotificationEvent::new(kind);
        let mut slot = self
            .slots
            .entry(subscriber)
            .or_insert_with(|| SubscriberSlot::new(self.config.max_cache_size));

        if slot.channels.is_empty() {
            tracing::debug!(
                %subscriber,
                event_type = event.event_type(),
                "no live channel, caching notification"
            );
            Self::cache_event(subscriber, &mut *slot, event);
            return PublishOutcome {
                cached: true,
                ..PublishOutcome::default()
            };
        }

        let mut outcome = PublishOutcome::default();
        let mut refused: Option<NotificationEvent> = None;
        let mut any_full = false;
        let mut dead = Vec::new();

        for sender in &slot.channels {
            match sender.try_deliver(event.clone()) {
                Delivery::Delivered => outcome.delivered += 1,
                Delivery::Full(returned) => {
                    tracing::warn!(
                        %subscriber,
                        channel = %sender.id(),
                        event_type = returned.event_type(),
                        "channel full, notification will be cached"
                    );
                    any_full = true;
                    refused.get_or_insert(returned);
                }
                Delivery::Closed(returned) => {
                    dead.push(sender.id());
                    refused.get_or_insert(returned);
                }
            }
        }

        if !dead.is_empty() {
            slot.channels.retain(|sender| !dead.contains(&sender.id()));
            outcome.pruned = dead.len();
            tracing::info!(
                %subscriber,
                pruned = dead.len(),
                remaining = slot.channels.len(),
                "removed broken notification channels"
            );
            if slot.channels.is_empty() {
                slot.disconnected_at = Some(Instant::now());
            }
        }

        if any_full || outcome.delivered == 0 {
            if let Some(event) = refused {
                Self::cache_event(subscriber, &mut *slot, event);
                outcome.cached = true;
            }
        } else {
            tracing::debug!(
                %subscriber,
                event_type = event.event_type(),
                channels = outcome.delivered,
                "notification delivered"
            );
        }

        outcome
    }

    fn cache_event(subscriber: SubscriberId, slot: &mut SubscriberSlot, event: NotificationEvent) {
        // A subscriber that never connected starts its retention clock at
        // the first cached event.
        if slot.channels.is_empty() && slot.disconnected_at.is_none() {
            slot.disconnected_at = Some(Instant::now());
        }
        if let Some(dropped) = slot.cache.push(event) {
            tracing::warn!(
                %subscriber,
                event_type = dropped.event_type(),
                max_cache_size = slot.cache.max_size(),
                "message cache full, dropped oldest notification"
            );
        }
    }

    /// Purge caches of subscribers disconnected longer than the retention
    /// window. Returns the number of subscribers purged.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.cache_retention();
        let mut purged = 0;

        self.slots.retain(|subscriber, slot| {
            if slot.is_expired(now, retention) {
                if !slot.cache.is_empty() {
                    tracing::info!(
                        %subscriber,
                        dropped = slot.cache.len(),
                        "cache retention elapsed, purging notifications"
                    );
                }
                purged += 1;
                false
            } else {
                // Idle slots with nothing to replay carry no state worth keeping
                !(slot.channels.is_empty() && slot.cache.is_empty())
            }
        });

        purged
    }

    /// Live channel count for `subscriber`
    #[must_use]
    pub fn channel_count(&self, subscriber: SubscriberId) -> usize {
        self.slots
            .get(&subscriber)
            .map_or(0, |slot| slot.channels.len())
    }

    /// Cached event count for `subscriber`
    #[must_use]
    pub fn cached_len(&self, subscriber: SubscriberId) -> usize {
        self.slots.get(&subscriber).map_or(0, |slot| slot.cache.len())
    }

    /// Copy of the cached events for `subscriber`, oldest first
    #[must_use]
    pub fn cached_events(&self, subscriber: SubscriberId) -> Vec<NotificationEvent> {
        self.slots
            .get(&subscriber)
            .map(|slot| slot.cache.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if `subscriber` has at least one live channel
    #[inline]
    #[must_use]
    pub fn is_connected(&self, subscriber: SubscriberId) -> bool {
        self.channel_count(subscriber) > 0
    }

    /// Aggregate statistics
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.slots.iter().fold(HubStats::default(), |mut stats, slot| {
            stats.subscribers += 1;
            stats.live_channels += slot.channels.len();
            stats.cached_events += slot.cache.len();
            stats
        })
    }

    /// Drop all subscriber state; open streams observe their channel closing
    pub fn reset(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecvOutcome;
    use crate::types::TaskId;

    fn hub() -> NotificationHub {
        NotificationHub::new(HubConfig::default())
    }

    fn started(label: &str) -> EventKind {
        EventKind::TaskStarted {
            task_id: TaskId::new(),
            task_type: label.to_string(),
        }
    }

    fn label(event: &NotificationEvent) -> String {
        match event.kind() {
            EventKind::TaskStarted { task_type, .. } => task_type.clone(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_channel_caches_once() {
        let hub = hub();
        let alice = SubscriberId(1);

        for n in 0..3 {
            let outcome = hub.publish(alice, started(&format!("e{n}")));
            assert!(outcome.cached);
            assert_eq!(outcome.delivered, 0);
            assert_eq!(hub.cached_len(alice), n + 1);
        }
    }

    #[tokio::test]
    async fn live_channel_receives_without_caching() {
        let hub = hub();
        let alice = SubscriberId(1);
        let mut rx = hub.connect(alice);

        let outcome = hub.publish(alice, started("live"));
        assert_eq!(outcome.delivered, 1);
        assert!(!outcome.cached);
        assert_eq!(hub.cached_len(alice), 0);
        assert_eq!(label(&rx.try_recv().unwrap()), "live");
    }

    #[tokio::test]
    async fn fan_out_reaches_every_tab() {
        let hub = hub();
        let alice = SubscriberId(1);
        let mut tab_a = hub.connect(alice);
        let mut tab_b = hub.connect(alice);
        assert_eq!(hub.channel_count(alice), 2);

        let outcome = hub.publish(alice, started("both"));
        assert_eq!(outcome.delivered, 2);
        assert_eq!(label(&tab_a.try_recv().unwrap()), "both");
        assert_eq!(label(&tab_b.try_recv().unwrap()), "both");
    }

    #[tokio::test]
    async fn reconnect_drains_cache_in_order() {
        let hub = hub();
        let alice = SubscriberId(1);
        for n in 0..4 {
            hub.publish(alice, started(&format!("e{n}")));
        }

        let mut rx = hub.connect(alice);
        assert_eq!(hub.cached_len(alice), 0);

        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv()).map(|e| label(&e)).collect();
        assert_eq!(received, vec!["e0", "e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn reconnect_leaves_overflow_cached() {
        let hub = NotificationHub::new(HubConfig::default().with_channel_capacity(2));
        let alice = SubscriberId(1);
        for n in 0..5 {
            hub.publish(alice, started(&format!("e{n}")));
        }

        let _rx = hub.connect(alice);
        let left: Vec<_> = hub.cached_events(alice).iter().map(label).collect();
        assert_eq!(left, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn full_channel_caches_and_stays_registered() {
        let hub = NotificationHub::new(HubConfig::default().with_channel_capacity(1));
        let alice = SubscriberId(1);
        let _rx = hub.connect(alice);

        assert_eq!(hub.publish(alice, started("fits")).delivered, 1);
        let outcome = hub.publish(alice, started("overflow"));

        assert_eq!(outcome.delivered, 0);
        assert!(outcome.cached);
        assert_eq!(outcome.pruned, 0);
        assert_eq!(hub.channel_count(alice), 1);
        assert_eq!(hub.cached_len(alice), 1);
    }

    #[tokio::test]
    async fn every_channel_full_caches_exactly_once() {
        let hub = NotificationHub::new(HubConfig::default().with_channel_capacity(1));
        let alice = SubscriberId(1);
        let _a = hub.connect(alice);
        let _b = hub.connect(alice);
        hub.publish(alice, started("fill"));

        let outcome = hub.publish(alice, started("overflow"));
        assert!(outcome.cached);
        assert_eq!(hub.cached_len(alice), 1);
    }

    #[tokio::test]
    async fn partially_full_fan_out_caches_once() {
        let hub = NotificationHub::new(HubConfig::default().with_channel_capacity(1));
        let alice = SubscriberId(1);
        let mut rx_a = hub.connect(alice);
        let _rx_b = hub.connect(alice);
        hub.publish(alice, started("fill"));
        assert!(rx_a.try_recv().is_some());

        let outcome = hub.publish(alice, started("overflow"));
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.cached);
        assert_eq!(outcome.pruned, 0);
        assert_eq!(hub.cached_len(alice), 1);
        assert_eq!(hub.channel_count(alice), 2);
        assert_eq!(label(&rx_a.try_recv().unwrap()), "overflow");
    }

    #[tokio::test]
    async fn configured_cache_bound_keeps_newest() {
        let hub = NotificationHub::new(HubConfig::default().with_max_cache_size(3));
        let alice = SubscriberId(1);
        for n in 0..5 {
            hub.publish(alice, started(&format!("e{n}")));
        }

        let labels: Vec<String> = hub.cached_events(alice).iter().map(label).collect();
        assert_eq!(labels, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_retention_window_expires_cache() {
        let hub = NotificationHub::new(HubConfig::default().with_cache_retention_secs(5));
        let alice = SubscriberId(1);
        hub.publish(alice, started("missed"));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(hub.sweep_expired(), 0);
        assert_eq!(hub.cached_len(alice), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(hub.sweep_expired(), 1);
        assert_eq!(hub.cached_len(alice), 0);
    }

    #[tokio::test]
    async fn closed_channel_is_pruned() {
        let hub = hub();
        let alice = SubscriberId(1);
        let rx_dead = hub.connect(alice);
        let mut rx_live = hub.connect(alice);
        drop(rx_dead);

        let outcome = hub.publish(alice, started("after-close"));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.pruned, 1);
        assert!(!outcome.cached);
        assert_eq!(hub.channel_count(alice), 1);
        assert!(rx_live.try_recv().is_some());
    }

    #[tokio::test]
    async fn last_closed_channel_falls_back_to_cache() {
        let hub = hub();
        let alice = SubscriberId(1);
        drop(hub.connect(alice));

        let outcome = hub.publish(alice, started("orphan"));
        assert_eq!(outcome.pruned, 1);
        assert!(outcome.cached);
        assert!(!hub.is_connected(alice));
        assert_eq!(hub.cached_len(alice), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let hub = hub();
        let alice = SubscriberId(1);
        let rx = hub.connect(alice);

        assert!(hub.disconnect(alice, rx.id()));
        assert!(!hub.disconnect(alice, rx.id()));
        assert!(!hub.disconnect(SubscriberId(99), rx.id()));
        assert_eq!(hub.channel_count(alice), 0);
    }

    #[tokio::test]
    async fn disconnect_closes_reader() {
        let hub = hub();
        let alice = SubscriberId(1);
        let mut rx = hub.connect(alice);
        hub.disconnect(alice, rx.id());

        let outcome = rx.recv_timeout(Duration::from_millis(10)).await;
        assert!(matches!(outcome, RecvOutcome::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_retention() {
        let hub = hub();
        let alice = SubscriberId(1);
        let rx = hub.connect(alice);
        hub.disconnect(alice, rx.id());
        hub.publish(alice, started("stale"));

        tokio::time::advance(Duration::from_secs(301)).await;
        let mut rx = hub.connect(alice);

        assert!(rx.try_recv().is_none());
        assert_eq!(hub.cached_len(alice), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_survives_within_retention() {
        let hub = hub();
        let alice = SubscriberId(1);
        let rx = hub.connect(alice);
        hub.disconnect(alice, rx.id());
        hub.publish(alice, started("fresh"));

        tokio::time::advance(Duration::from_secs(299)).await;
        let mut rx = hub.connect(alice);

        assert_eq!(label(&rx.try_recv().unwrap()), "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn connected_subscriber_is_never_swept() {
        let hub = hub();
        let alice = SubscriberId(1);
        let _rx = hub.connect(alice);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(hub.sweep_expired(), 0);
        assert!(hub.is_connected(alice));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_only_touches_expired_subscribers() {
        let hub = hub();
        hub.publish(SubscriberId(1), started("old"));
        tokio::time::advance(Duration::from_secs(200)).await;
        hub.publish(SubscriberId(2), started("new"));
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(hub.sweep_expired(), 1);
        assert_eq!(hub.cached_len(SubscriberId(1)), 0);
        assert_eq!(hub.cached_len(SubscriberId(2)), 1);
    }

    #[tokio::test]
    async fn stats_and_reset() {
        let hub = hub();
        let _rx = hub.connect(SubscriberId(1));
        hub.publish(SubscriberId(2), started("cached"));

        let stats = hub.stats();
        assert_eq!(stats.subscribers, 2);
        assert_eq!(stats.live_channels, 1);
        assert_eq!(stats.cached_events, 1);

        hub.reset();
        assert_eq!(hub.stats(), HubStats::default());
    }
}
