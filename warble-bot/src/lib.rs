//! warble-bot: orchestration layer for a WhatsApp chat bot.
//!
//! Wraps a [`warble_transport::Transport`] with everything a long-running
//! bot process needs:
//! - session credential storage and environment bootstrap
//! - a reconnect supervisor driven by disconnect-reason classification
//! - a hot-reloadable directory of declarative plugins
//! - event routing into a swappable handler module
//! - message-sending sugar (files, contacts, buttons, lists)

pub mod facade;
pub mod handler;
pub mod plugins;
pub mod router;
pub mod server;
pub mod session;
pub mod sniff;
pub mod supervisor;
pub mod util;
pub mod watch;
