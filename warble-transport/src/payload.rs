//! Outgoing payload shapes passed to [`Connection::send`].
//!
//! [`Connection::send`]: crate::conn::Connection::send

use serde_json::Value;

use crate::event::MessageKey;
use crate::jid::Jid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Sticker,
    Document,
}

impl MediaKind {
    pub fn name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Sticker => "sticker",
            MediaKind::Document => "document",
        }
    }
}

/// Where the media content comes from.
///
/// A reference (local path or URL) lets the transport stream/upload the
/// content itself; inline bytes are the fallback when a referenced send
/// fails.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    Reference(String),
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaMessage {
    pub kind: MediaKind,
    pub source: MediaSource,
    pub mimetype: String,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    /// Send audio as a voice note.
    pub ptt: bool,
}

/// A contact attachment: display name plus a rendered vCard.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactCard {
    pub display_name: String,
    pub vcard: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingPayload {
    Text {
        text: String,
        mentions: Vec<Jid>,
    },
    Media(MediaMessage),
    Contacts {
        display_name: Option<String>,
        cards: Vec<ContactCard>,
    },
    /// A pre-shaped interactive message (buttons, list) in its view-once
    /// envelope. The facade builds these; the transport relays them as-is.
    Interactive(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub quoted: Option<MessageKey>,
}

impl SendOptions {
    pub fn quoting(key: MessageKey) -> Self {
        Self { quoted: Some(key) }
    }
}

/// Receipt for a sent message.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub key: MessageKey,
    pub timestamp: i64,
}
