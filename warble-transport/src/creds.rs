//! The opaque authentication credential blob.
//!
//! The protocol library creates and rotates this; warble only persists it.
//! The one thing we do inspect is the self-identity field: a blob without a
//! resolvable `me.id` is invalid as a whole and must be discarded, never
//! partially trusted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::jid::Jid;

#[derive(Debug, Error)]
pub enum CredsError {
    #[error("credential blob is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("credential blob has no resolvable self identity (me.id)")]
    MissingIdentity,
}

/// The account the credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub jid: Jid,
    pub name: Option<String>,
}

/// Opaque credential material (identity keys, registration state).
///
/// Structurally this is whatever JSON the protocol library produced; the
/// only invariant enforced here is the self-identity one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBlob(Value);

impl CredentialBlob {
    /// Parse and validate a serialized blob.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CredsError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Validate an already-parsed blob.
    pub fn from_value(value: Value) -> Result<Self, CredsError> {
        let blob = Self(value);
        if blob.identity().is_none() {
            return Err(CredsError::MissingIdentity);
        }
        Ok(blob)
    }

    /// The validated self identity.
    pub fn identity(&self) -> Option<SelfIdentity> {
        let me = self.0.get("me")?;
        let id = me.get("id")?.as_str()?;
        if id.is_empty() {
            return None;
        }
        Some(SelfIdentity {
            jid: Jid::new(id),
            name: me.get("name").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Whether this blob represents a completed device registration.
    pub fn registered(&self) -> bool {
        self.0.get("registered").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CredsError> {
        Ok(serde_json::to_vec(&self.0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_blob_resolves_identity() {
        let blob = CredentialBlob::from_value(json!({
            "me": { "id": "254700000001:5@s.whatsapp.net", "name": "warble" },
            "registered": true,
        }))
        .unwrap();
        let id = blob.identity().unwrap();
        assert_eq!(id.jid.as_str(), "254700000001@s.whatsapp.net");
        assert_eq!(id.name.as_deref(), Some("warble"));
        assert!(blob.registered());
    }

    #[test]
    fn blob_without_me_is_rejected() {
        let err = CredentialBlob::from_value(json!({ "noiseKey": {} })).unwrap_err();
        assert!(matches!(err, CredsError::MissingIdentity));
    }

    #[test]
    fn blob_with_empty_id_is_rejected() {
        let err = CredentialBlob::from_value(json!({ "me": { "id": "" } })).unwrap_err();
        assert!(matches!(err, CredsError::MissingIdentity));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(matches!(CredentialBlob::from_slice(b"{not json"), Err(CredsError::Json(_))));
    }
}
