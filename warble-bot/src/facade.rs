//! Message-sending sugar over a raw [`Connection`].
//!
//! Free async functions, each shaping one payload kind: plain replies,
//! files from any source with mimetype sniffing and an inline-bytes
//! fallback, vCard contacts, and the interactive button/list envelopes.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use serde_json::{json, Value};
use warble_transport::{
    Connection, ContactCard, Jid, MediaKind, MediaMessage, MediaSource, MessageKey,
    OutgoingPayload, SendOptions, SentMessage,
};

use crate::sniff;

/// Send a plain text message, optionally quoting another.
pub async fn reply(
    conn: &dyn Connection,
    to: &Jid,
    text: &str,
    quoted: Option<MessageKey>,
) -> Result<SentMessage> {
    conn.send(
        to,
        OutgoingPayload::Text { text: text.to_string(), mentions: vec![] },
        SendOptions { quoted },
    )
    .await
}

/// Reply with raw bytes: falls through to a file send with everything
/// inferred from the content.
pub async fn reply_bytes(
    conn: &dyn Connection,
    to: &Jid,
    bytes: Vec<u8>,
    quoted: Option<MessageKey>,
) -> Result<SentMessage> {
    send_file(
        conn,
        to,
        FileSource::Bytes(bytes),
        SendFileOptions { quoted, ..SendFileOptions::default() },
    )
    .await
}

/// Text with explicit mentions (the `@` tags must appear in the text).
pub async fn reply_mentioning(
    conn: &dyn Connection,
    to: &Jid,
    text: &str,
    mentions: Vec<Jid>,
    quoted: Option<MessageKey>,
) -> Result<SentMessage> {
    conn.send(
        to,
        OutgoingPayload::Text { text: text.to_string(), mentions },
        SendOptions { quoted },
    )
    .await
}

/// Where file content comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Url(String),
}

impl FileSource {
    /// Interpret a user-supplied string: http(s) URL, `data:` URL, or a
    /// local path.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(FileSource::Url(raw.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("data:") {
            let Some((_, b64)) = rest.split_once(";base64,") else {
                bail!("unsupported data URL, expected base64 encoding");
            };
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .context("data URL payload is not valid base64")?;
            return Ok(FileSource::Bytes(bytes));
        }
        Ok(FileSource::Path(PathBuf::from(raw)))
    }

    /// Fetch the content. Returns the bytes and, when the source can be
    /// re-fetched by the transport itself, its reference string.
    async fn resolve(&self) -> Result<(Vec<u8>, Option<String>)> {
        match self {
            FileSource::Bytes(bytes) => Ok((bytes.clone(), None)),
            FileSource::Path(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                Ok((bytes, Some(path.display().to_string())))
            }
            FileSource::Url(url) => {
                let bytes = reqwest::get(url)
                    .await
                    .with_context(|| format!("fetching {url}"))?
                    .error_for_status()?
                    .bytes()
                    .await?
                    .to_vec();
                Ok((bytes, Some(url.clone())))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendFileOptions {
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub mimetype: Option<String>,
    /// Send audio as a voice note.
    pub ptt: bool,
    /// Force document framing regardless of the detected type.
    pub as_document: bool,
    pub quoted: Option<MessageKey>,
}

fn kind_for_mime(mime: &str, opts: &SendFileOptions) -> MediaKind {
    if opts.as_document {
        return MediaKind::Document;
    }
    if mime == "image/webp" {
        return MediaKind::Sticker;
    }
    if mime.starts_with("image/") {
        return MediaKind::Image;
    }
    if mime.starts_with("video/") {
        return MediaKind::Video;
    }
    if mime.starts_with("audio/") {
        return MediaKind::Audio;
    }
    MediaKind::Document
}

/// Send a file from any source.
///
/// The mimetype comes from `opts`, else from magic-byte sniffing, and picks
/// the media kind. If a referenced send fails (transports can reject URLs
/// or paths they cannot fetch themselves), the same content is retried once
/// with the bytes inlined.
pub async fn send_file(
    conn: &dyn Connection,
    to: &Jid,
    source: FileSource,
    opts: SendFileOptions,
) -> Result<SentMessage> {
    let (bytes, reference) = source.resolve().await?;
    let sniffed = sniff::detect(&bytes);
    let mimetype = opts.mimetype.clone().unwrap_or_else(|| sniffed.mime.to_string());
    let kind = kind_for_mime(&mimetype, &opts);
    let file_name = opts
        .file_name
        .clone()
        .or_else(|| matches!(kind, MediaKind::Document).then(|| format!("file.{}", sniffed.ext)));

    let media = MediaMessage {
        kind,
        source: match &reference {
            Some(reference) => MediaSource::Reference(reference.clone()),
            None => MediaSource::Inline(bytes.clone()),
        },
        mimetype,
        file_name,
        caption: opts.caption.clone(),
        ptt: opts.ptt,
    };
    let options = SendOptions { quoted: opts.quoted.clone() };

    match conn.send(to, OutgoingPayload::Media(media.clone()), options.clone()).await {
        Ok(sent) => Ok(sent),
        Err(e) if reference.is_some() => {
            tracing::warn!(error = %e, "referenced media send failed, retrying inline");
            let inline = MediaMessage { source: MediaSource::Inline(bytes), ..media };
            conn.send(to, OutgoingPayload::Media(inline), options).await
        }
        Err(e) => Err(e),
    }
}

/// Render a version 3.0 vCard for a phone number.
pub fn vcard(number: &str, name: &str) -> String {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let name = name.replace('\\', "\\\\").replace('\n', "\\n");
    format!(
        "BEGIN:VCARD\nVERSION:3.0\nN:;{name};;;\nFN:{name}\nTEL;type=CELL;type=VOICE;waid={digits}:+{digits}\nEND:VCARD"
    )
}

/// Send one or more contact cards as a single message. With several
/// contacts the envelope is titled "N contacts".
pub async fn send_contacts(
    conn: &dyn Connection,
    to: &Jid,
    contacts: &[(&str, &str)],
    quoted: Option<MessageKey>,
) -> Result<SentMessage> {
    let cards: Vec<ContactCard> = contacts
        .iter()
        .map(|(number, name)| ContactCard {
            display_name: name.to_string(),
            vcard: vcard(number, name),
        })
        .collect();
    let display_name = match cards.as_slice() {
        [] => bail!("no contacts to send"),
        [only] => only.display_name.clone(),
        many => format!("{} contacts", many.len()),
    };
    conn.send(
        to,
        OutgoingPayload::Contacts { display_name: Some(display_name), cards },
        SendOptions { quoted },
    )
    .await
}

/// One button in an interactive message.
#[derive(Debug, Clone, PartialEq)]
pub enum Button {
    /// Tapping sends `id` back as the reply.
    Reply { label: String, id: String },
    /// Tapping copies `code` to the clipboard.
    CopyCode { label: String, code: String },
    /// Tapping opens `url`.
    Url { label: String, url: String },
}

impl Button {
    fn to_flow_json(&self) -> Value {
        match self {
            Button::Reply { label, id } => json!({
                "name": "quick_reply",
                "buttonParamsJson": json!({
                    "display_text": label,
                    "id": id,
                })
                .to_string(),
            }),
            Button::CopyCode { label, code } => json!({
                "name": "cta_copy",
                "buttonParamsJson": json!({
                    "display_text": label,
                    "copy_code": code,
                })
                .to_string(),
            }),
            Button::Url { label, url } => json!({
                "name": "cta_url",
                "buttonParamsJson": json!({
                    "display_text": label,
                    "url": url,
                    "merchant_url": url,
                })
                .to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListRow {
    pub title: String,
    pub description: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

fn interactive_envelope(header: Value, body: &str, footer: &str, buttons: Vec<Value>) -> Value {
    json!({
        "viewOnceMessage": {
            "message": {
                "interactiveMessage": {
                    "header": header,
                    "body": { "text": body },
                    "footer": { "text": footer },
                    "nativeFlowMessage": {
                        "buttons": buttons,
                        "messageParamsJson": "",
                    },
                }
            }
        }
    })
}

/// Send a quick-reply button message.
pub async fn send_buttons(
    conn: &dyn Connection,
    to: &Jid,
    text: &str,
    footer: &str,
    buttons: &[Button],
    quoted: Option<MessageKey>,
) -> Result<SentMessage> {
    let flow: Vec<Value> = buttons.iter().map(Button::to_flow_json).collect();
    let envelope = interactive_envelope(json!({ "hasMediaAttachment": false }), text, footer, flow);
    conn.send(to, OutgoingPayload::Interactive(envelope), SendOptions { quoted }).await
}

/// Send a single-select list message.
pub async fn send_list(
    conn: &dyn Connection,
    to: &Jid,
    title: &str,
    text: &str,
    button: &str,
    sections: &[ListSection],
    quoted: Option<MessageKey>,
) -> Result<SentMessage> {
    let sections_json: Vec<Value> = sections
        .iter()
        .map(|section| {
            json!({
                "title": section.title,
                "rows": section
                    .rows
                    .iter()
                    .map(|row| json!({
                        "title": row.title,
                        "description": row.description,
                        "id": row.id,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    let select = json!({
        "name": "single_select",
        "buttonParamsJson": json!({
            "title": button,
            "sections": sections_json,
        })
        .to_string(),
    });
    let envelope = interactive_envelope(
        json!({ "title": title, "hasMediaAttachment": false }),
        text,
        "",
        vec![select],
    );
    conn.send(to, OutgoingPayload::Interactive(envelope), SendOptions { quoted }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use warble_transport::memory::LoopbackTransport;
    use warble_transport::{ChatCache, ConnectConfig, Transport};

    async fn connected() -> (LoopbackTransport, std::sync::Arc<dyn Connection>) {
        let transport = LoopbackTransport::new();
        let conn = transport
            .connect(&ConnectConfig::default(), ChatCache::new())
            .await
            .unwrap();
        (transport, conn)
    }

    fn chat() -> Jid {
        Jid::new("254700000001@s.whatsapp.net")
    }

    #[test]
    fn vcard_shape() {
        let card = vcard("+254 700-000-001", "Ada");
        assert_eq!(
            card,
            "BEGIN:VCARD\nVERSION:3.0\nN:;Ada;;;\nFN:Ada\nTEL;type=CELL;type=VOICE;waid=254700000001:+254700000001\nEND:VCARD"
        );
    }

    #[test]
    fn vcard_escapes_name() {
        let card = vcard("1", "A\nB\\C");
        assert!(card.contains("FN:A\\nB\\\\C"));
    }

    #[test]
    fn file_source_parsing() {
        assert_eq!(
            FileSource::parse("https://example.com/a.png").unwrap(),
            FileSource::Url("https://example.com/a.png".into())
        );
        assert_eq!(
            FileSource::parse("data:image/png;base64,aGk=").unwrap(),
            FileSource::Bytes(b"hi".to_vec())
        );
        assert_eq!(
            FileSource::parse("/tmp/a.png").unwrap(),
            FileSource::Path(PathBuf::from("/tmp/a.png"))
        );
        assert!(FileSource::parse("data:text/plain,hi").is_err());
    }

    #[tokio::test]
    async fn inline_bytes_become_sniffed_media() {
        let (transport, conn) = connected().await;
        send_file(
            conn.as_ref(),
            &chat(),
            FileSource::Bytes(b"\x89PNG\r\n\x1a\nrest".to_vec()),
            SendFileOptions::default(),
        )
        .await
        .unwrap();

        let sent = transport.last_connection().unwrap().sent();
        match &sent[0].1 {
            OutgoingPayload::Media(media) => {
                assert_eq!(media.kind, MediaKind::Image);
                assert_eq!(media.mimetype, "image/png");
                assert!(matches!(media.source, MediaSource::Inline(_)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn referenced_send_falls_back_to_inline() {
        let (transport, conn) = connected().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.ogg");
        std::fs::write(&path, b"OggS\x00\x02data").unwrap();

        transport.fail_next_sends(1);
        send_file(
            conn.as_ref(),
            &chat(),
            FileSource::Path(path),
            SendFileOptions { ptt: true, ..Default::default() },
        )
        .await
        .unwrap();

        let sent = transport.last_connection().unwrap().sent();
        assert_eq!(sent.len(), 1, "only the successful retry is recorded");
        match &sent[0].1 {
            OutgoingPayload::Media(media) => {
                assert_eq!(media.kind, MediaKind::Audio);
                assert!(media.ptt);
                assert!(matches!(media.source, MediaSource::Inline(_)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_bytes_go_out_as_document() {
        let (transport, conn) = connected().await;
        send_file(
            conn.as_ref(),
            &chat(),
            FileSource::Bytes(b"plain text".to_vec()),
            SendFileOptions::default(),
        )
        .await
        .unwrap();

        let sent = transport.last_connection().unwrap().sent();
        match &sent[0].1 {
            OutgoingPayload::Media(media) => {
                assert_eq!(media.kind, MediaKind::Document);
                assert_eq!(media.file_name.as_deref(), Some("file.bin"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn contact_envelope_counts_cards() {
        let (transport, conn) = connected().await;
        send_contacts(conn.as_ref(), &chat(), &[("111", "One"), ("222", "Two")], None)
            .await
            .unwrap();

        let sent = transport.last_connection().unwrap().sent();
        match &sent[0].1 {
            OutgoingPayload::Contacts { display_name, cards } => {
                assert_eq!(display_name.as_deref(), Some("2 contacts"));
                assert_eq!(cards.len(), 2);
                assert!(cards[0].vcard.contains("waid=111"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        assert!(send_contacts(conn.as_ref(), &chat(), &[], None).await.is_err());
    }

    #[tokio::test]
    async fn button_envelope_shape() {
        let (transport, conn) = connected().await;
        send_buttons(
            conn.as_ref(),
            &chat(),
            "pick one",
            "warble",
            &[
                Button::Reply { label: "Yes".into(), id: "yes".into() },
                Button::CopyCode { label: "Copy".into(), code: "ABCD".into() },
                Button::Url { label: "Docs".into(), url: "https://example.com".into() },
            ],
            None,
        )
        .await
        .unwrap();

        let sent = transport.last_connection().unwrap().sent();
        let OutgoingPayload::Interactive(envelope) = &sent[0].1 else {
            panic!("expected interactive payload");
        };
        let message = &envelope["viewOnceMessage"]["message"]["interactiveMessage"];
        assert_eq!(message["body"]["text"], "pick one");
        assert_eq!(message["footer"]["text"], "warble");
        let buttons = message["nativeFlowMessage"]["buttons"].as_array().unwrap();
        assert_eq!(buttons.len(), 3);
        assert_eq!(buttons[0]["name"], "quick_reply");
        let params: Value =
            serde_json::from_str(buttons[0]["buttonParamsJson"].as_str().unwrap()).unwrap();
        assert_eq!(params["display_text"], "Yes");
        assert_eq!(params["id"], "yes");
        assert_eq!(buttons[1]["name"], "cta_copy");
        let params: Value =
            serde_json::from_str(buttons[1]["buttonParamsJson"].as_str().unwrap()).unwrap();
        assert_eq!(params["copy_code"], "ABCD");
        assert_eq!(buttons[2]["name"], "cta_url");
        let params: Value =
            serde_json::from_str(buttons[2]["buttonParamsJson"].as_str().unwrap()).unwrap();
        assert_eq!(params["url"], "https://example.com");
    }

    #[tokio::test]
    async fn list_envelope_shape() {
        let (transport, conn) = connected().await;
        send_list(
            conn.as_ref(),
            &chat(),
            "Menu",
            "choose",
            "Open",
            &[ListSection {
                title: "Main".into(),
                rows: vec![ListRow {
                    title: "Ping".into(),
                    description: "liveness".into(),
                    id: "ping".into(),
                }],
            }],
            None,
        )
        .await
        .unwrap();

        let sent = transport.last_connection().unwrap().sent();
        let OutgoingPayload::Interactive(envelope) = &sent[0].1 else {
            panic!("expected interactive payload");
        };
        let message = &envelope["viewOnceMessage"]["message"]["interactiveMessage"];
        assert_eq!(message["header"]["title"], "Menu");
        let buttons = message["nativeFlowMessage"]["buttons"].as_array().unwrap();
        assert_eq!(buttons[0]["name"], "single_select");
        let params: Value =
            serde_json::from_str(buttons[0]["buttonParamsJson"].as_str().unwrap()).unwrap();
        assert_eq!(params["title"], "Open");
        assert_eq!(params["sections"][0]["rows"][0]["id"], "ping");
    }
}
