//! Connection traits and the per-connection event bus.
//!
//! The bus is an explicit subscription table (event kind → callbacks)
//! rather than an ambient emitter: subscribers get a [`ListenerId`] back and
//! must unsubscribe with it, and a whole binding set can be swapped in one
//! atomic table operation so no event is delivered between unbind and bind.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::creds::SelfIdentity;
use crate::event::{EventKind, EventPayload};
use crate::jid::Jid;
use crate::payload::{OutgoingPayload, SendOptions, SentMessage};

/// An event handler. Handlers are async and may send through the connection
/// they captured; failures are logged by the bus, never propagated.
pub type EventCallback = Arc<dyn Fn(EventPayload) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Token identifying one subscription on one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, EventCallback)>>,
}

impl BusInner {
    fn subscribe(&mut self, kind: EventKind, callback: EventCallback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(kind).or_default().push((id, callback));
        id
    }

    fn unsubscribe(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(other, _)| *other != id);
        entries.len() != before
    }
}

/// Per-connection event fan-out.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, callback: EventCallback) -> ListenerId {
        self.inner.lock().subscribe(kind, callback)
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.lock().unsubscribe(kind, id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Replace subscriptions in one table operation.
    ///
    /// Every `remove` entry is dropped and every `add` entry inserted under a
    /// single lock acquisition, so an [`emit`](Self::emit) snapshot sees
    /// either the old set or the new set, never a mixture.
    pub fn swap(
        &self,
        remove: &[(EventKind, ListenerId)],
        add: Vec<(EventKind, EventCallback)>,
    ) -> Vec<(EventKind, ListenerId)> {
        let mut inner = self.inner.lock();
        for (kind, id) in remove {
            inner.unsubscribe(*kind, *id);
        }
        add.into_iter()
            .map(|(kind, callback)| (kind, inner.subscribe(kind, callback)))
            .collect()
    }

    /// Deliver one event to every listener of its kind, sequentially and in
    /// subscription order. The listener snapshot is taken atomically; the
    /// lock is not held across callback awaits, so handlers may themselves
    /// subscribe or send.
    pub async fn emit(&self, payload: EventPayload) {
        let kind = payload.kind();
        let snapshot: Vec<EventCallback> = {
            let inner = self.inner.lock();
            inner
                .listeners
                .get(&kind)
                .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in snapshot {
            if let Err(e) = callback(payload.clone()).await {
                tracing::warn!(event = kind.name(), error = %e, "event handler failed");
            }
        }
    }
}

/// Static connection options, mirrored from the protocol library's knobs.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub browser: String,
    pub version: (u32, u32, u32),
    pub mark_online: bool,
    pub sync_full_history: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            browser: "chrome (linux)".to_string(),
            version: (2, 3000, 1015901307),
            mark_online: true,
            sync_full_history: false,
        }
    }
}

/// What we remember about a chat across reconnects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatInfo {
    pub name: Option<String>,
}

/// Mutable chat state carried from a discarded connection into its
/// replacement.
pub type ChatCache = HashMap<Jid, ChatInfo>;

/// One live session with the messaging network.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The connection's event subscription interface.
    fn events(&self) -> &EventBus;

    async fn send(
        &self,
        to: &Jid,
        payload: OutgoingPayload,
        options: SendOptions,
    ) -> Result<SentMessage>;

    /// The logged-in account, or `None` before pairing completes.
    fn identity(&self) -> Option<SelfIdentity>;

    /// Snapshot of the known chats.
    fn chats(&self) -> ChatCache;

    /// Request a pairing code for phone-number login.
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// Factory for connections. The supervisor constructs a fresh connection
/// from the same config (plus carried-over chats) on every reconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, config: &ConnectConfig, carry: ChatCache) -> Result<Arc<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        Arc::new(move |_payload| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(EventKind::MessageDelete, counting_callback(hits.clone()));
        assert_eq!(bus.listener_count(EventKind::MessageDelete), 1);

        let payload = EventPayload::MessageDelete(crate::event::MessageKey {
            chat: Jid::new("123@s.whatsapp.net"),
            id: "A1".into(),
            from_me: false,
        });
        bus.emit(payload.clone()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(EventKind::MessageDelete, id));
        assert!(!bus.unsubscribe(EventKind::MessageDelete, id));
        bus.emit(payload).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn swap_replaces_without_duplicates() {
        let bus = EventBus::new();
        let old_hits = Arc::new(AtomicUsize::new(0));
        let new_hits = Arc::new(AtomicUsize::new(0));

        let old = bus.swap(
            &[],
            vec![(EventKind::PresenceUpdate, counting_callback(old_hits.clone()))],
        );
        let _new = bus.swap(
            &old,
            vec![(EventKind::PresenceUpdate, counting_callback(new_hits.clone()))],
        );
        assert_eq!(bus.listener_count(EventKind::PresenceUpdate), 1);

        bus.emit(EventPayload::PresenceUpdate(crate::event::PresenceUpdate {
            chat: Jid::new("123@s.whatsapp.net"),
            who: Jid::new("456@s.whatsapp.net"),
            presence: crate::event::Presence::Composing,
        }))
        .await;
        assert_eq!(old_hits.load(Ordering::SeqCst), 0);
        assert_eq!(new_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_later_ones() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            EventKind::GroupsUpdate,
            Arc::new(|_| Box::pin(async { anyhow::bail!("handler exploded") })),
        );
        bus.subscribe(EventKind::GroupsUpdate, counting_callback(hits.clone()));

        bus.emit(EventPayload::GroupsUpdate(vec![])).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
