//! In-process loopback transport.
//!
//! Implements [`Transport`] without any network: sent payloads are recorded,
//! events are injected by the caller. The whole test suite drives the
//! supervisor/router stack through this, and the `warble` binary runs on it
//! until a real protocol backend is wired up.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::conn::{ChatCache, ConnectConfig, Connection, EventBus, Transport};
use crate::creds::SelfIdentity;
use crate::event::{EventPayload, MessageKey};
use crate::jid::Jid;
use crate::payload::{OutgoingPayload, SendOptions, SentMessage};

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    fail_sends: AtomicBool,
    fail_budget: AtomicUsize,
    identity: Mutex<Option<SelfIdentity>>,
    connections: Mutex<Vec<Arc<LoopbackConnection>>>,
}

/// A [`Transport`] that hands out [`LoopbackConnection`]s.
#[derive(Default)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, identity: SelfIdentity) -> Self {
        *self.shared.identity.lock() = Some(identity);
        self
    }

    /// Number of connections created so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// The most recently created connection.
    pub fn last_connection(&self) -> Option<Arc<LoopbackConnection>> {
        self.shared.connections.lock().last().cloned()
    }

    /// Make every subsequent `send` fail, until turned off again.
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make only the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.fail_budget.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, _config: &ConnectConfig, carry: ChatCache) -> Result<Arc<dyn Connection>> {
        let conn = Arc::new(LoopbackConnection {
            bus: EventBus::new(),
            shared: self.shared.clone(),
            carry: Mutex::new(carry),
            sent: Mutex::new(Vec::new()),
            next_msg_id: AtomicU64::new(1),
        });
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.connections.lock().push(conn.clone());
        Ok(conn)
    }
}

pub struct LoopbackConnection {
    bus: EventBus,
    shared: Arc<Shared>,
    carry: Mutex<ChatCache>,
    sent: Mutex<Vec<(Jid, OutgoingPayload, SendOptions)>>,
    next_msg_id: AtomicU64,
}

impl LoopbackConnection {
    /// Deliver an event to this connection's subscribers, awaiting every
    /// handler before returning.
    pub async fn inject(&self, payload: EventPayload) {
        self.bus.emit(payload).await;
    }

    /// Seed the chat cache, as a transport would while syncing.
    pub fn insert_chat(&self, jid: Jid, info: crate::conn::ChatInfo) {
        self.carry.lock().insert(jid, info);
    }

    /// Everything sent through this connection, oldest first.
    pub fn sent(&self) -> Vec<(Jid, OutgoingPayload, SendOptions)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn events(&self) -> &EventBus {
        &self.bus
    }

    async fn send(
        &self,
        to: &Jid,
        payload: OutgoingPayload,
        options: SendOptions,
    ) -> Result<SentMessage> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            bail!("loopback send refused");
        }
        if self
            .shared
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("loopback send refused (budgeted)");
        }
        let id = self.next_msg_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push((to.clone(), payload, options));
        Ok(SentMessage {
            key: MessageKey {
                chat: to.clone(),
                id: format!("LB{id:04}"),
                from_me: true,
            },
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    fn identity(&self) -> Option<SelfIdentity> {
        self.shared.identity.lock().clone()
    }

    fn chats(&self) -> ChatCache {
        self.carry.lock().clone()
    }

    async fn request_pairing_code(&self, _phone: &str) -> Result<String> {
        Ok("LOOP1234".to_string())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sends_and_counts_connections() {
        let transport = LoopbackTransport::new();
        let conn = transport.connect(&ConnectConfig::default(), ChatCache::new()).await.unwrap();
        assert_eq!(transport.connect_count(), 1);

        let to = Jid::new("123@s.whatsapp.net");
        let sent = conn
            .send(
                &to,
                OutgoingPayload::Text { text: "hi".into(), mentions: vec![] },
                SendOptions::default(),
            )
            .await
            .unwrap();
        assert!(sent.key.from_me);

        let last = transport.last_connection().unwrap();
        assert_eq!(last.sent_count(), 1);
    }

    #[tokio::test]
    async fn fail_sends_flag() {
        let transport = LoopbackTransport::new();
        let conn = transport.connect(&ConnectConfig::default(), ChatCache::new()).await.unwrap();
        transport.set_fail_sends(true);
        let to = Jid::new("123@s.whatsapp.net");
        let result = conn
            .send(
                &to,
                OutgoingPayload::Text { text: "hi".into(), mentions: vec![] },
                SendOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }
}
