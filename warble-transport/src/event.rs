//! The fixed event set a connection emits.

use serde_json::Value;

use crate::creds::CredentialBlob;
use crate::jid::Jid;

/// Names of the events a connection can emit. The set is fixed: the router
/// binds exactly one callback per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessagesUpsert,
    MessagesUpdate,
    GroupParticipantsUpdate,
    GroupsUpdate,
    MessageDelete,
    PresenceUpdate,
    ConnectionUpdate,
    CredsUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::MessagesUpsert,
        EventKind::MessagesUpdate,
        EventKind::GroupParticipantsUpdate,
        EventKind::GroupsUpdate,
        EventKind::MessageDelete,
        EventKind::PresenceUpdate,
        EventKind::ConnectionUpdate,
        EventKind::CredsUpdate,
    ];

    /// Wire-style event name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::MessagesUpsert => "messages.upsert",
            EventKind::MessagesUpdate => "messages.update",
            EventKind::GroupParticipantsUpdate => "group-participants.update",
            EventKind::GroupsUpdate => "groups.update",
            EventKind::MessageDelete => "message.delete",
            EventKind::PresenceUpdate => "presence.update",
            EventKind::ConnectionUpdate => "connection.update",
            EventKind::CredsUpdate => "creds.update",
        }
    }
}

/// Identifies one message within one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub chat: Jid,
    pub id: String,
    pub from_me: bool,
}

/// An incoming message, already decrypted and flattened by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub key: MessageKey,
    pub sender: Jid,
    pub push_name: Option<String>,
    pub text: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
}

/// A status/content update for an already-delivered message (receipts,
/// poll votes, edits). The body stays opaque to the orchestration layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdate {
    pub key: MessageKey,
    pub update: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

/// Group membership change.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantsUpdate {
    pub group: Jid,
    pub action: ParticipantAction,
    pub participants: Vec<Jid>,
}

/// Group metadata change. Only the changed fields are set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupMetaUpdate {
    pub group: Jid,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub announce: Option<bool>,
    pub restrict: Option<bool>,
}

impl GroupMetaUpdate {
    pub fn new(group: Jid) -> Self {
        Self { group, ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Recording,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceUpdate {
    pub chat: Jid,
    pub who: Jid,
    pub presence: Presence,
}

/// Connection lifecycle phase as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Close,
}

/// The generic connection-state-update event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionUpdate {
    pub state: Option<LinkState>,
    /// Status code of the last disconnect, if the transport had one.
    pub disconnect_code: Option<u16>,
    pub disconnect_reason: Option<String>,
    pub is_new_login: bool,
    /// QR payload when the transport is waiting for a QR scan.
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self { state: Some(LinkState::Open), ..Default::default() }
    }

    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            state: Some(LinkState::Close),
            disconnect_code: code,
            disconnect_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// One emitted event: the kind plus its data.
#[derive(Debug, Clone)]
pub enum EventPayload {
    MessagesUpsert(Vec<IncomingMessage>),
    MessagesUpdate(Vec<MessageUpdate>),
    GroupParticipantsUpdate(ParticipantsUpdate),
    GroupsUpdate(Vec<GroupMetaUpdate>),
    MessageDelete(MessageKey),
    PresenceUpdate(PresenceUpdate),
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate(CredentialBlob),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::MessagesUpsert(_) => EventKind::MessagesUpsert,
            EventPayload::MessagesUpdate(_) => EventKind::MessagesUpdate,
            EventPayload::GroupParticipantsUpdate(_) => EventKind::GroupParticipantsUpdate,
            EventPayload::GroupsUpdate(_) => EventKind::GroupsUpdate,
            EventPayload::MessageDelete(_) => EventKind::MessageDelete,
            EventPayload::PresenceUpdate(_) => EventKind::PresenceUpdate,
            EventPayload::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            EventPayload::CredsUpdate(_) => EventKind::CredsUpdate,
        }
    }
}
