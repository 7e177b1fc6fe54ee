//! Small value helpers shared across the bot.

use rand::Rng;
use warble_transport::Jid;

/// Pick a random element.
pub fn pick<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..items.len());
    items.get(index)
}

/// Render a duration in seconds as `1d 2h 3m 4s`, dropping leading zero
/// units.
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || !parts.is_empty() {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || !parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

/// Group a pairing code into dash-separated blocks of four for display:
/// `ABCD1234` → `ABCD-1234`.
pub fn format_pairing_code(code: &str) -> String {
    code.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// The `@`-mention text for a JID. The matching JID must also be listed in
/// the payload's mentions for clients to highlight it.
pub fn mention_tag(jid: &Jid) -> String {
    format!("@{}", jid.user())
}
