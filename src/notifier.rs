//! Cross-surface event relay.
//!
//! One broadcast channel per event name. Delivery is at-most-once to the
//! listeners that exist at publish time; nothing is persisted or replayed.
//! Events of the same name reach each listener in publish order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::settings::SettingsKey;

/// Event name carrying `{changedKeys: [...]}` after a settings commit
pub const SETTINGS_CHANGED_EVENT: &str = "settings://changed";

/// Event name carrying a short display string for the toast surface
pub const TOAST_EVENT: &str = "toast://message";

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Identifies a window surface (spotlight, options, toast).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SurfaceLabel(String);

impl SurfaceLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn spotlight() -> Self {
        Self::new("spotlight")
    }

    pub fn options() -> Self {
        Self::new("options")
    }

    pub fn toast() -> Self {
        Self::new("toast")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceEvent {
    /// Only key names travel; values are re-read from the store.
    SettingsChanged {
        #[serde(rename = "changedKeys")]
        changed_keys: Vec<SettingsKey>,
    },
    Toast { message: String },
}

impl SurfaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceEvent::SettingsChanged { .. } => SETTINGS_CHANGED_EVENT,
            SurfaceEvent::Toast { .. } => TOAST_EVENT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    /// Publishing surface, if any
    pub origin: Option<SurfaceLabel>,
    /// Restricts delivery to one surface; `None` reaches every listener
    pub target: Option<SurfaceLabel>,
    pub event: SurfaceEvent,
}

impl EventEnvelope {
    fn is_for(&self, surface: &SurfaceLabel) -> bool {
        self.target.as_ref().map_or(true, |target| target == surface)
    }
}

struct NotifierInner {
    next_sequence: AtomicU64,
    capacity: usize,
    channels: RwLock<HashMap<&'static str, broadcast::Sender<EventEnvelope>>>,
}

/// Handle to the relay; clones share the same channels.
#[derive(Clone)]
pub struct CrossSurfaceNotifier {
    inner: Arc<NotifierInner>,
}

impl Default for CrossSurfaceNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl CrossSurfaceNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                next_sequence: AtomicU64::new(0),
                capacity: capacity.max(1),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn sender(&self, event_name: &'static str) -> broadcast::Sender<EventEnvelope> {
        if let Some(sender) = self
            .inner
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event_name)
        {
            return sender.clone();
        }

        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(event_name)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    /// Publish to every current listener of the event's name.
    pub fn publish(&self, origin: Option<&SurfaceLabel>, event: SurfaceEvent) -> EventEnvelope {
        self.dispatch(origin, None, event)
    }

    /// Publish to a single surface.
    pub fn publish_to(
        &self,
        origin: Option<&SurfaceLabel>,
        target: &SurfaceLabel,
        event: SurfaceEvent,
    ) -> EventEnvelope {
        self.dispatch(origin, Some(target.clone()), event)
    }

    fn dispatch(
        &self,
        origin: Option<&SurfaceLabel>,
        target: Option<SurfaceLabel>,
        event: SurfaceEvent,
    ) -> EventEnvelope {
        let envelope = EventEnvelope {
            sequence: self.inner.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
            emitted_at: Utc::now(),
            origin: origin.cloned(),
            target,
            event,
        };

        let sender = self.sender(envelope.event.name());
        // No listeners is not an error: nobody is open to see it.
        let delivered = sender.send(envelope.clone()).unwrap_or(0);
        log::debug!(
            "[notifier] {} #{} delivered to {} listener(s)",
            envelope.event.name(),
            envelope.sequence,
            delivered
        );
        envelope
    }

    /// Subscribe `surface` to one event name.
    ///
    /// Only events published after this call are observed.
    pub fn subscribe(&self, surface: &SurfaceLabel, event_name: &'static str) -> Subscription {
        Subscription {
            surface: surface.clone(),
            event_name,
            receiver: self.sender(event_name).subscribe(),
        }
    }

    /// Run `handler` for every matching event until the returned handle is
    /// dropped or unsubscribed.
    pub fn listen<F>(
        &self,
        surface: &SurfaceLabel,
        event_name: &'static str,
        handler: F,
    ) -> ListenerHandle
    where
        F: Fn(EventEnvelope) + Send + 'static,
    {
        let mut subscription = self.subscribe(surface, event_name);
        let id = Uuid::new_v4();
        let task = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                handler(envelope);
            }
        });
        ListenerHandle {
            id,
            event_name,
            task: Some(task),
        }
    }

    pub fn listener_count(&self, event_name: &'static str) -> usize {
        self.sender(event_name).receiver_count()
    }
}

/// Receiving end of one surface's subscription.
pub struct Subscription {
    surface: SurfaceLabel,
    event_name: &'static str,
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl Subscription {
    /// Next event addressed to this surface; `None` once the relay is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.is_for(&self.surface) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "[notifier] {} on {} lagged, {} event(s) dropped",
                        self.event_name,
                        self.surface,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Unsubscribes on drop.
pub struct ListenerHandle {
    id: Uuid,
    event_name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            log::debug!("[notifier] listener {} on {} removed", self.id, self.event_name);
            task.abort();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn toast(message: &str) -> SurfaceEvent {
        SurfaceEvent::Toast {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_no_replay() {
        let notifier = CrossSurfaceNotifier::default();
        notifier.publish(None, toast("early"));

        let mut sub = notifier.subscribe(&SurfaceLabel::toast(), TOAST_EVENT);
        notifier.publish(None, toast("late"));

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.event, toast("late"));
    }

    #[tokio::test]
    async fn test_same_kind_events_arrive_in_order() {
        let notifier = CrossSurfaceNotifier::default();
        let mut sub = notifier.subscribe(&SurfaceLabel::toast(), TOAST_EVENT);

        for i in 0..5 {
            notifier.publish(None, toast(&format!("m{}", i)));
        }
        for i in 0..5 {
            let envelope = sub.recv().await.unwrap();
            assert_eq!(envelope.event, toast(&format!("m{}", i)));
        }
    }

    #[tokio::test]
    async fn test_targeted_event_skips_other_surfaces() {
        let notifier = CrossSurfaceNotifier::default();
        let mut spotlight = notifier.subscribe(&SurfaceLabel::spotlight(), TOAST_EVENT);
        let mut toast_sub = notifier.subscribe(&SurfaceLabel::toast(), TOAST_EVENT);

        notifier.publish_to(None, &SurfaceLabel::toast(), toast("copied"));
        notifier.publish(None, toast("broadcast"));

        assert_eq!(toast_sub.recv().await.unwrap().event, toast("copied"));
        assert_eq!(spotlight.recv().await.unwrap().event, toast("broadcast"));
    }

    #[tokio::test]
    async fn test_event_names_are_isolated() {
        let notifier = CrossSurfaceNotifier::default();
        let mut sub = notifier.subscribe(&SurfaceLabel::options(), SETTINGS_CHANGED_EVENT);

        notifier.publish(None, toast("ignored"));
        notifier.publish(
            None,
            SurfaceEvent::SettingsChanged {
                changed_keys: vec![SettingsKey::SelectedModel],
            },
        );

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.event.name(), SETTINGS_CHANGED_EVENT);
    }

    #[tokio::test]
    async fn test_listener_unsubscribes_on_drop() {
        let notifier = CrossSurfaceNotifier::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let handle = notifier.listen(&SurfaceLabel::toast(), TOAST_EVENT, move |envelope| {
            seen_clone.lock().unwrap().push(envelope.sequence);
        });
        notifier.publish(None, toast("one"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.publish(None, toast("two"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(notifier.listener_count(TOAST_EVENT), 0);
    }

    #[test]
    fn test_settings_changed_payload_shape() {
        let event = SurfaceEvent::SettingsChanged {
            changed_keys: vec![SettingsKey::WebSearchApiKey],
        };
        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["changedKeys"][0], "webSearchApiKey");
    }
}
