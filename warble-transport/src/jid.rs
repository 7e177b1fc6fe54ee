//! JID values — messaging-network addresses for users and groups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain suffix for user JIDs.
pub const USER_DOMAIN: &str = "s.whatsapp.net";
/// Domain suffix for group JIDs.
pub const GROUP_DOMAIN: &str = "g.us";

/// A messaging-network address for a user or group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    /// Wrap a raw JID string, normalizing it first.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    /// Build a user JID from a phone number (non-digits stripped).
    pub fn from_digits(number: &str) -> Self {
        let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
        Self(format!("{digits}@{USER_DOMAIN}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the `@`.
    pub fn user(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_DOMAIN)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a raw JID string.
///
/// Strips the per-device suffix (`1234:17@s.whatsapp.net` →
/// `1234@s.whatsapp.net`). Bare phone numbers become user JIDs.
pub fn normalize(raw: &str) -> String {
    match raw.split_once('@') {
        Some((user, domain)) => {
            let user = user.split(':').next().unwrap_or(user);
            format!("{user}@{domain}")
        }
        None => {
            let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
            format!("{digits}@{USER_DOMAIN}")
        }
    }
}
