//! Transport abstraction for the warble bot.
//!
//! The WhatsApp multi-device protocol itself — handshake, encryption, wire
//! format — lives in an external protocol library. This crate defines the
//! seam the bot drives it through: the [`Transport`] / [`Connection`] traits,
//! the fixed event set a connection emits, disconnect reason codes and their
//! recovery classification, outgoing payload shapes, and the opaque
//! credential blob.
//!
//! A loopback implementation ([`memory`]) is bundled for tests and local
//! development runs; a real protocol backend plugs in by implementing
//! [`Transport`].

pub mod conn;
pub mod creds;
pub mod event;
pub mod jid;
pub mod memory;
pub mod payload;
pub mod reason;

pub use conn::{
    ChatCache, ChatInfo, ConnectConfig, Connection, EventBus, EventCallback, ListenerId, Transport,
};
pub use creds::{CredentialBlob, CredsError, SelfIdentity};
pub use jid::Jid;
pub use event::{
    ConnectionUpdate, EventKind, EventPayload, GroupMetaUpdate, IncomingMessage, LinkState,
    MessageKey, MessageUpdate, ParticipantAction, ParticipantsUpdate, Presence, PresenceUpdate,
};
pub use payload::{ContactCard, MediaKind, MediaMessage, MediaSource, OutgoingPayload, SendOptions, SentMessage};
pub use reason::{classify, ReasonClass};
