//! Durable session credential storage.
//!
//! One directory per account: `creds.json` holds the credential blob, and
//! the protocol library scatters per-device key files (`pre-key-*`,
//! `session-*`, ...) next to it. This module owns only what the bot itself
//! touches: loading/validating the blob, bootstrapping it from an
//! environment string, persisting rotations, and cleaning stale pre-keys.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use flate2::read::GzDecoder;
use warble_transport::CredentialBlob;

pub const CREDS_FILE: &str = "creds.json";

/// Prefix of the disposable key files the cleanup sweep removes.
const PREKEY_PREFIX: &str = "pre-key-";

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a session directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating session directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Load persisted credentials.
    ///
    /// A file that fails to parse or has no self identity is deleted on the
    /// spot and reported as absent, so the caller falls through to the
    /// bootstrap/pairing path instead of crashing on it again next start.
    pub fn load(&self) -> Result<Option<CredentialBlob>> {
        let path = self.creds_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        match CredentialBlob::from_slice(&bytes) {
            Ok(blob) => {
                tracing::info!("existing session is valid");
                Ok(Some(blob))
            }
            Err(e) => {
                tracing::warn!(error = %e, "removing unusable session file");
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(error = %e, "could not delete invalid session file");
                }
                Ok(None)
            }
        }
    }

    /// Bootstrap credentials from a `<tag>~<base64>` environment value.
    ///
    /// The payload is base64 over gzip over the credential JSON. Literal
    /// `...` sequences are stripped before decoding; some channels people
    /// paste session strings through insert them as truncation marks.
    /// A payload that decodes but has no self identity is rejected without
    /// touching the on-disk state.
    pub fn bootstrap(&self, value: &str, expected_tag: &str) -> Result<CredentialBlob> {
        let Some((tag, body)) = value.split_once('~') else {
            bail!("invalid session string, expected {expected_tag}~<base64>");
        };
        if tag != expected_tag {
            bail!("session string has tag {tag:?}, expected {expected_tag:?}");
        }
        let cleaned: String = body.replace("...", "");
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(cleaned.trim())
            .context("session payload is not valid base64")?;
        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .context("session payload is not valid gzip")?;
        let blob = CredentialBlob::from_slice(&json).context("decoded session data is unusable")?;
        std::fs::write(self.creds_path(), &json)
            .with_context(|| format!("writing {}", self.creds_path().display()))?;
        tracing::info!("session bootstrapped from environment");
        Ok(blob)
    }

    /// Persist a rotated credential blob. The rotation event handler awaits
    /// this before returning, so a crash right after never loses keys.
    pub async fn save(&self, blob: &CredentialBlob) -> Result<()> {
        let bytes = blob.to_bytes()?;
        tokio::fs::write(self.creds_path(), bytes)
            .await
            .with_context(|| format!("writing {}", self.creds_path().display()))?;
        Ok(())
    }

    /// Delete stale `pre-key-*` files. Returns how many were removed.
    ///
    /// The protocol library accumulates these as one-time keys get consumed;
    /// it regenerates what it needs, so sweeping them while connected is
    /// safe and keeps the directory from growing without bound.
    pub fn clear_prekeys(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading {}", self.dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(PREKEY_PREFIX) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(file = name, error = %e, "pre-key delete failed"),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const TAG: &str = "WARBLE";

    fn valid_creds_json() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "me": { "id": "254700000001:3@s.whatsapp.net", "name": "test" },
            "registered": true,
        }))
        .unwrap()
    }

    fn session_string(json: &[u8]) -> String {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(json).unwrap();
        let compressed = enc.finish().unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(compressed);
        format!("{TAG}~{b64}")
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn load_deletes_corrupt_creds() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        std::fs::write(store.creds_path(), b"{not json").unwrap();

        assert!(store.load().unwrap().is_none());
        assert!(!store.creds_path().exists());
    }

    #[test]
    fn load_deletes_creds_without_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        std::fs::write(store.creds_path(), br#"{"registered": true}"#).unwrap();

        assert!(store.load().unwrap().is_none());
        assert!(!store.creds_path().exists());
    }

    #[test]
    fn bootstrap_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let blob = store.bootstrap(&session_string(&valid_creds_json()), TAG).unwrap();
        assert_eq!(blob.identity().unwrap().jid.as_str(), "254700000001@s.whatsapp.net");

        // persisted, and loadable on the next start
        let reloaded = store.load().unwrap().unwrap();
        assert_eq!(reloaded, blob);
    }

    #[test]
    fn bootstrap_strips_ellipsis_noise() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let clean = session_string(&valid_creds_json());
        let (tag, body) = clean.split_once('~').unwrap();
        let noisy = format!("{tag}~{}...{}", &body[..10], &body[10..]);
        assert!(store.bootstrap(&noisy, TAG).is_ok());
    }

    #[test]
    fn bootstrap_rejects_wrong_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let value = session_string(&valid_creds_json()).replacen(TAG, "OTHER", 1);
        assert!(store.bootstrap(&value, TAG).is_err());
        assert!(!store.creds_path().exists());
    }

    #[test]
    fn bootstrap_rejects_payload_without_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let value = session_string(br#"{"registered": false}"#);
        assert!(store.bootstrap(&value, TAG).is_err());
        assert!(!store.creds_path().exists());
    }

    #[test]
    fn clear_prekeys_only_touches_prekeys() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        std::fs::write(store.creds_path(), valid_creds_json()).unwrap();
        std::fs::write(dir.path().join("pre-key-1.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("pre-key-2.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("session-123.json"), b"{}").unwrap();

        assert_eq!(store.clear_prekeys().unwrap(), 2);
        assert!(store.creds_path().exists());
        assert!(dir.path().join("session-123.json").exists());
        assert_eq!(store.clear_prekeys().unwrap(), 0);
    }
}
