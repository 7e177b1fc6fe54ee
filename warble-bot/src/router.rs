//! Binding the fixed event set to the bot's handlers.
//!
//! Every connection gets exactly one callback per event kind. Two of them
//! are wired internally: `connection.update` is forwarded into the
//! supervisor's lifecycle channel, and `creds.update` is persisted through
//! the session store before the handler returns. The remaining six fan out
//! to a [`HandlerModule`].
//!
//! Rebinding on the same connection goes through the bus's atomic swap, so
//! no event can observe a half-bound table; binding a fresh connection
//! unbinds the old one first.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use warble_transport::{
    Connection, ConnectionUpdate, EventCallback, EventKind, EventPayload, GroupMetaUpdate,
    IncomingMessage, ListenerId, MessageKey, MessageUpdate, ParticipantsUpdate, PresenceUpdate,
};

use crate::session::SessionStore;

/// The swappable chat-facing behavior of the bot.
///
/// Implementations must be cheap to clone behind an `Arc`; the router
/// captures one clone per bound event.
#[async_trait]
pub trait HandlerModule: Send + Sync {
    async fn on_messages(
        &self,
        conn: Arc<dyn Connection>,
        batch: Vec<IncomingMessage>,
    ) -> Result<()>;

    async fn on_message_updates(
        &self,
        conn: Arc<dyn Connection>,
        updates: Vec<MessageUpdate>,
    ) -> Result<()>;

    async fn on_participants(
        &self,
        conn: Arc<dyn Connection>,
        update: ParticipantsUpdate,
    ) -> Result<()>;

    async fn on_groups_update(
        &self,
        conn: Arc<dyn Connection>,
        updates: Vec<GroupMetaUpdate>,
    ) -> Result<()>;

    async fn on_message_delete(&self, conn: Arc<dyn Connection>, key: MessageKey) -> Result<()>;

    async fn on_presence(&self, conn: Arc<dyn Connection>, update: PresenceUpdate) -> Result<()>;
}

pub struct EventRouter {
    session: Arc<SessionStore>,
    lifecycle: mpsc::Sender<ConnectionUpdate>,
    bound: Option<(Arc<dyn Connection>, Vec<(EventKind, ListenerId)>)>,
}

impl EventRouter {
    pub fn new(session: Arc<SessionStore>, lifecycle: mpsc::Sender<ConnectionUpdate>) -> Self {
        Self { session, lifecycle, bound: None }
    }

    /// True until the first bind.
    pub fn is_init(&self) -> bool {
        self.bound.is_none()
    }

    /// Bind the full event set on `conn`, replacing whatever was bound
    /// before. On the same connection this is one atomic table swap; a
    /// previous different connection is unbound first, which also drops the
    /// callbacks' `Arc`s into it.
    pub fn bind(&mut self, conn: Arc<dyn Connection>, handler: Arc<dyn HandlerModule>) {
        let add = self.build_callbacks(&conn, handler);
        let remove = match self.bound.take() {
            Some((old, ids)) if Arc::ptr_eq(&old, &conn) => ids,
            Some((old, ids)) => {
                for (kind, id) in ids {
                    old.events().unsubscribe(kind, id);
                }
                Vec::new()
            }
            None => Vec::new(),
        };
        let ids = conn.events().swap(&remove, add);
        self.bound = Some((conn, ids));
    }

    /// Drop all bindings.
    pub fn unbind(&mut self) {
        if let Some((conn, ids)) = self.bound.take() {
            for (kind, id) in ids {
                conn.events().unsubscribe(kind, id);
            }
        }
    }

    fn build_callbacks(
        &self,
        conn: &Arc<dyn Connection>,
        handler: Arc<dyn HandlerModule>,
    ) -> Vec<(EventKind, EventCallback)> {
        let mut add: Vec<(EventKind, EventCallback)> = Vec::with_capacity(EventKind::ALL.len());

        macro_rules! forward {
            ($kind:ident, $variant:ident, $method:ident) => {{
                let conn = conn.clone();
                let handler = handler.clone();
                let callback: EventCallback = Arc::new(move |payload| {
                    let conn = conn.clone();
                    let handler = handler.clone();
                    Box::pin(async move {
                        if let EventPayload::$variant(data) = payload {
                            handler.$method(conn, data).await
                        } else {
                            Ok(())
                        }
                    })
                });
                add.push((EventKind::$kind, callback));
            }};
        }

        forward!(MessagesUpsert, MessagesUpsert, on_messages);
        forward!(MessagesUpdate, MessagesUpdate, on_message_updates);
        forward!(GroupParticipantsUpdate, GroupParticipantsUpdate, on_participants);
        forward!(GroupsUpdate, GroupsUpdate, on_groups_update);
        forward!(MessageDelete, MessageDelete, on_message_delete);
        forward!(PresenceUpdate, PresenceUpdate, on_presence);

        {
            let lifecycle = self.lifecycle.clone();
            let callback: EventCallback = Arc::new(move |payload| {
                let lifecycle = lifecycle.clone();
                Box::pin(async move {
                    if let EventPayload::ConnectionUpdate(update) = payload {
                        lifecycle
                            .send(update)
                            .await
                            .map_err(|_| anyhow!("supervisor lifecycle channel closed"))?;
                    }
                    Ok(())
                })
            });
            add.push((EventKind::ConnectionUpdate, callback));
        }

        {
            let session = self.session.clone();
            let callback: EventCallback = Arc::new(move |payload| {
                let session = session.clone();
                Box::pin(async move {
                    if let EventPayload::CredsUpdate(blob) = payload {
                        // persisted before the emit returns, so a rotation is
                        // never lost to a crash between event and write
                        session.save(&blob).await?;
                        tracing::debug!("rotated credentials persisted");
                    }
                    Ok(())
                })
            });
            add.push((EventKind::CredsUpdate, callback));
        }

        add
    }
}
