//! The default [`HandlerModule`]: prefix command parsing, plugin dispatch,
//! and group lifecycle announcements.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use warble_transport::{
    Connection, GroupMetaUpdate, IncomingMessage, Jid, MessageKey, MessageUpdate,
    ParticipantAction, ParticipantsUpdate, PresenceUpdate,
};

use crate::facade;
use crate::plugins::{Plugin, PluginRegistry, ResponseSpec};
use crate::router::HandlerModule;
use crate::util;

/// Templates for group membership announcements. `@user` is replaced with
/// a mention of the affected participant.
#[derive(Debug, Clone)]
pub struct GroupTexts {
    pub welcome: String,
    pub goodbye: String,
    pub promote: String,
    pub demote: String,
}

impl Default for GroupTexts {
    fn default() -> Self {
        Self {
            welcome: "Welcome @user!".to_string(),
            goodbye: "@user left the group".to_string(),
            promote: "@user is now an admin".to_string(),
            demote: "@user is no longer an admin".to_string(),
        }
    }
}

pub struct BotHandler {
    plugins: Arc<PluginRegistry>,
    /// Characters accepted as a command prefix.
    prefix: String,
    group_texts: GroupTexts,
}

impl BotHandler {
    pub fn new(plugins: Arc<PluginRegistry>, prefix: impl Into<String>) -> Self {
        Self {
            plugins,
            prefix: prefix.into(),
            group_texts: GroupTexts::default(),
        }
    }

    pub fn with_group_texts(mut self, texts: GroupTexts) -> Self {
        self.group_texts = texts;
        self
    }

    /// Split `!word rest` into `(word, rest)` if the text starts with one
    /// of the prefix characters.
    fn parse_command<'a>(&self, text: &'a str) -> Option<(&'a str, &'a str)> {
        let trimmed = text.trim();
        let first = trimmed.chars().next()?;
        if !self.prefix.contains(first) {
            return None;
        }
        let rest = trimmed[first.len_utf8()..].trim_start();
        if rest.is_empty() {
            return None;
        }
        let (word, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        Some((word, args.trim()))
    }

    async fn dispatch(
        &self,
        conn: &Arc<dyn Connection>,
        msg: &IncomingMessage,
        word: &str,
    ) -> Result<()> {
        let quoted = Some(msg.key.clone());
        if let Some((id, plugin)) = self.plugins.find_command(word) {
            tracing::debug!(plugin = %id, command = word, chat = %msg.key.chat, "dispatching");
            self.respond(conn, msg, &plugin).await
        } else if word.eq_ignore_ascii_case("help") || word.eq_ignore_ascii_case("menu") {
            self.send_help(conn, &msg.key.chat, quoted).await
        } else {
            // unknown commands stay silent; people type prefixed text all
            // the time without meaning us
            Ok(())
        }
    }

    async fn respond(
        &self,
        conn: &Arc<dyn Connection>,
        msg: &IncomingMessage,
        plugin: &Plugin,
    ) -> Result<()> {
        let chat = &msg.key.chat;
        let quoted = Some(msg.key.clone());
        match &plugin.response {
            ResponseSpec::Text { text } => {
                facade::reply(conn.as_ref(), chat, &render(text, msg), quoted).await?;
            }
            ResponseSpec::Random { choices } => {
                if let Some(choice) = util::pick(choices) {
                    facade::reply(conn.as_ref(), chat, &render(choice, msg), quoted).await?;
                }
            }
            ResponseSpec::Buttons { text, footer, buttons } => {
                let buttons: Vec<facade::Button> = buttons
                    .iter()
                    .map(|b| facade::Button::Reply { label: b.label.clone(), id: b.id.clone() })
                    .collect();
                facade::send_buttons(conn.as_ref(), chat, text, footer, &buttons, quoted).await?;
            }
            ResponseSpec::List { title, text, button, sections } => {
                let sections: Vec<facade::ListSection> = sections
                    .iter()
                    .map(|s| facade::ListSection {
                        title: s.title.clone(),
                        rows: s
                            .rows
                            .iter()
                            .map(|r| facade::ListRow {
                                title: r.title.clone(),
                                description: r.description.clone(),
                                id: r.id.clone(),
                            })
                            .collect(),
                    })
                    .collect();
                facade::send_list(conn.as_ref(), chat, title, text, button, &sections, quoted)
                    .await?;
            }
            ResponseSpec::Contact { number, display_name } => {
                facade::send_contacts(
                    conn.as_ref(),
                    chat,
                    &[(number.as_str(), display_name.as_str())],
                    quoted,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn send_help(
        &self,
        conn: &Arc<dyn Connection>,
        chat: &Jid,
        quoted: Option<MessageKey>,
    ) -> Result<()> {
        let plugins = self.plugins.all();
        if plugins.is_empty() {
            facade::reply(conn.as_ref(), chat, "no commands installed", quoted).await?;
            return Ok(());
        }
        let mut lines = vec!["available commands:".to_string()];
        for (_, plugin) in plugins {
            let commands = plugin.commands.join(", ");
            match plugin.help {
                Some(help) => lines.push(format!("  {commands} - {help}")),
                None => lines.push(format!("  {commands}")),
            }
        }
        facade::reply(conn.as_ref(), chat, &lines.join("\n"), quoted).await?;
        Ok(())
    }

    async fn announce(
        &self,
        conn: &Arc<dyn Connection>,
        update: &ParticipantsUpdate,
    ) -> Result<()> {
        let template = match update.action {
            ParticipantAction::Add => &self.group_texts.welcome,
            ParticipantAction::Remove => &self.group_texts.goodbye,
            ParticipantAction::Promote => &self.group_texts.promote,
            ParticipantAction::Demote => &self.group_texts.demote,
        };
        for who in &update.participants {
            let text = template.replace("@user", &util::mention_tag(who));
            facade::reply_mentioning(conn.as_ref(), &update.group, &text, vec![who.clone()], None)
                .await?;
        }
        Ok(())
    }
}

fn render(template: &str, msg: &IncomingMessage) -> String {
    let name = msg
        .push_name
        .clone()
        .unwrap_or_else(|| msg.sender.user().to_string());
    template
        .replace("{name}", &name)
        .replace("{sender}", msg.sender.as_str())
}

#[async_trait]
impl HandlerModule for BotHandler {
    async fn on_messages(
        &self,
        conn: Arc<dyn Connection>,
        batch: Vec<IncomingMessage>,
    ) -> Result<()> {
        for msg in &batch {
            if msg.key.from_me {
                continue;
            }
            let Some(text) = msg.text.as_deref() else { continue };
            let Some((word, _args)) = self.parse_command(text) else { continue };
            if let Err(e) = self.dispatch(&conn, msg, word).await {
                tracing::warn!(command = word, chat = %msg.key.chat, error = %e, "command failed");
            }
        }
        Ok(())
    }

    async fn on_message_updates(
        &self,
        _conn: Arc<dyn Connection>,
        updates: Vec<MessageUpdate>,
    ) -> Result<()> {
        tracing::debug!(count = updates.len(), "message updates");
        Ok(())
    }

    async fn on_participants(
        &self,
        conn: Arc<dyn Connection>,
        update: ParticipantsUpdate,
    ) -> Result<()> {
        self.announce(&conn, &update).await
    }

    async fn on_groups_update(
        &self,
        conn: Arc<dyn Connection>,
        updates: Vec<GroupMetaUpdate>,
    ) -> Result<()> {
        for update in &updates {
            if let Some(subject) = &update.subject {
                facade::reply(
                    conn.as_ref(),
                    &update.group,
                    &format!("group renamed to {subject}"),
                    None,
                )
                .await?;
            }
            if let Some(announce) = update.announce {
                let text = if announce {
                    "group closed: only admins can send"
                } else {
                    "group opened: everyone can send"
                };
                facade::reply(conn.as_ref(), &update.group, text, None).await?;
            }
            if update.description.is_some() {
                tracing::debug!(group = %update.group, "group description changed");
            }
        }
        Ok(())
    }

    async fn on_message_delete(&self, _conn: Arc<dyn Connection>, key: MessageKey) -> Result<()> {
        tracing::info!(chat = %key.chat, id = %key.id, "message deleted");
        Ok(())
    }

    async fn on_presence(&self, _conn: Arc<dyn Connection>, update: PresenceUpdate) -> Result<()> {
        tracing::trace!(chat = %update.chat, who = %update.who, presence = ?update.presence, "presence");
        Ok(())
    }
}
