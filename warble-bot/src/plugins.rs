//! Hot-reloadable plugin registry.
//!
//! Plugins are declarative TOML manifests in a flat directory: a command
//! list plus a response to render. The registry keeps them in a `BTreeMap`
//! keyed by file name, so iteration (and therefore command dispatch when
//! two plugins claim the same word) is deterministic and lexicographic.
//!
//! A broken manifest never evicts the last good version of an
//! already-loaded plugin; it is logged and skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

/// One declarative response a plugin can produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseSpec {
    /// A fixed text reply. `{name}` and `{sender}` are substituted.
    Text { text: String },
    /// One of the choices, picked at random per invocation.
    Random { choices: Vec<String> },
    /// An interactive quick-reply button message.
    Buttons {
        text: String,
        #[serde(default)]
        footer: String,
        buttons: Vec<ButtonSpec>,
    },
    /// A single-select list message.
    List {
        title: String,
        text: String,
        button: String,
        sections: Vec<ListSectionSpec>,
    },
    /// A contact card.
    Contact { number: String, display_name: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ButtonSpec {
    pub label: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListSectionSpec {
    pub title: String,
    pub rows: Vec<ListRowSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListRowSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub id: String,
}

/// A parsed plugin manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plugin {
    pub name: String,
    /// Command words (matched case-insensitively after the prefix).
    pub commands: Vec<String>,
    /// One-line description shown in the help listing.
    #[serde(default)]
    pub help: Option<String>,
    pub response: ResponseSpec,
}

impl Plugin {
    /// Semantic checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("plugin name is empty");
        }
        if self.commands.is_empty() {
            bail!("plugin declares no commands");
        }
        for command in &self.commands {
            if command.is_empty() || command.chars().any(char::is_whitespace) {
                bail!("invalid command word {command:?}");
            }
        }
        match &self.response {
            ResponseSpec::Random { choices } if choices.is_empty() => {
                bail!("random response has no choices");
            }
            ResponseSpec::Buttons { buttons, .. } if buttons.is_empty() => {
                bail!("button response has no buttons");
            }
            ResponseSpec::List { sections, .. } if sections.is_empty() => {
                bail!("list response has no sections");
            }
            _ => Ok(()),
        }
    }
}

/// Whether a directory entry name is a plugin manifest.
pub fn is_plugin_file(name: &str) -> bool {
    name.ends_with(".toml")
}

fn parse_manifest(path: &Path) -> Result<Plugin> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let plugin: Plugin = toml::from_str(&content)?;
    plugin.validate()?;
    Ok(plugin)
}

/// Check that a file is at least well-formed TOML, without requiring the
/// manifest schema. Used to decide whether a changed file may replace the
/// last good version of an existing plugin.
fn syntax_check(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    content.parse::<toml::Table>()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub plugin: Plugin,
    pub loaded_at: DateTime<Utc>,
}

/// The live set of plugins, keyed by manifest file name.
pub struct PluginRegistry {
    dir: PathBuf,
    plugins: RwLock<BTreeMap<String, PluginRecord>>,
}

impl PluginRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            plugins: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory (non-recursively) and replace the registry with
    /// what it holds right now. Manifests that fail to parse are logged and
    /// skipped; they never abort the scan. Returns the number loaded.
    pub fn load_all(&self) -> usize {
        let mut loaded = BTreeMap::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "plugin directory unreadable");
                return 0;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_plugin_file(name) {
                continue;
            }
            match parse_manifest(&path) {
                Ok(plugin) => {
                    loaded.insert(
                        name.to_string(),
                        PluginRecord { plugin, loaded_at: Utc::now() },
                    );
                }
                Err(e) => tracing::error!(plugin = name, error = %e, "skipping broken plugin"),
            }
        }
        let count = loaded.len();
        *self.plugins.write() = loaded;
        count
    }

    /// React to one changed manifest, by file name.
    ///
    /// Deleted file: the plugin is evicted (idempotent — a second call is a
    /// no-op). Changed file that no longer parses: logged, and the previous
    /// version stays active. Otherwise the new version replaces the old
    /// atomically.
    pub fn reload_one(&self, identifier: &str) {
        if !is_plugin_file(identifier) {
            return;
        }
        let path = self.dir.join(identifier);
        let known = self.plugins.read().contains_key(identifier);

        if !path.exists() {
            if self.plugins.write().remove(identifier).is_some() {
                tracing::warn!(plugin = identifier, "plugin removed");
            }
            return;
        }

        // For a known plugin, cheap syntax gate first so an obviously broken
        // save never races the full parse below.
        if known {
            if let Err(e) = syntax_check(&path) {
                tracing::error!(plugin = identifier, error = %e, "syntax error, keeping previous version");
                return;
            }
        }

        match parse_manifest(&path) {
            Ok(plugin) => {
                self.plugins.write().insert(
                    identifier.to_string(),
                    PluginRecord { plugin, loaded_at: Utc::now() },
                );
                if known {
                    tracing::info!(plugin = identifier, "plugin updated");
                } else {
                    tracing::info!(plugin = identifier, "new plugin loaded");
                }
            }
            Err(e) => {
                if known {
                    tracing::error!(plugin = identifier, error = %e, "reload failed, keeping previous version");
                } else {
                    tracing::error!(plugin = identifier, error = %e, "plugin load failed");
                }
            }
        }
    }

    pub fn get(&self, identifier: &str) -> Option<Plugin> {
        self.plugins.read().get(identifier).map(|r| r.plugin.clone())
    }

    /// Find the plugin handling a command word. Matching is
    /// case-insensitive; with competing claims the lexicographically first
    /// manifest wins.
    pub fn find_command(&self, word: &str) -> Option<(String, Plugin)> {
        let word = word.to_lowercase();
        self.plugins
            .read()
            .iter()
            .find(|(_, record)| {
                record.plugin.commands.iter().any(|c| c.to_lowercase() == word)
            })
            .map(|(id, record)| (id.clone(), record.plugin.clone()))
    }

    /// All plugins in identifier order.
    pub fn all(&self) -> Vec<(String, Plugin)> {
        self.plugins
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.plugin.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = r#"
name = "ping"
commands = ["ping"]
help = "liveness check"

[response]
kind = "text"
text = "pong"
"#;

    const DICE: &str = r#"
name = "dice"
commands = ["roll", "dice"]

[response]
kind = "random"
choices = ["1", "2", "3", "4", "5", "6"]
"#;

    fn registry_with(files: &[(&str, &str)]) -> (tempfile::TempDir, PluginRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let registry = PluginRegistry::new(dir.path());
        (dir, registry)
    }

    #[test]
    fn load_all_skips_broken_manifests() {
        let (_dir, registry) = registry_with(&[
            ("ping.toml", PING),
            ("broken.toml", "name = \"x\"\ncommands ="),
            ("notes.txt", "not a plugin"),
        ]);
        assert_eq!(registry.load_all(), 1);
        assert!(registry.get("ping.toml").is_some());
        assert!(registry.get("broken.toml").is_none());
    }

    #[test]
    fn find_command_is_case_insensitive_and_ordered() {
        let (dir, registry) = registry_with(&[("ping.toml", PING), ("dice.toml", DICE)]);
        registry.load_all();

        let (id, plugin) = registry.find_command("PING").unwrap();
        assert_eq!(id, "ping.toml");
        assert_eq!(plugin.name, "ping");

        // competing claim: add a second manifest that also answers "ping";
        // "aping.toml" sorts first and must win
        std::fs::write(dir.path().join("aping.toml"), PING).unwrap();
        registry.reload_one("aping.toml");
        let (id, _) = registry.find_command("ping").unwrap();
        assert_eq!(id, "aping.toml");
    }

    #[test]
    fn broken_update_keeps_last_good_version() {
        let (dir, registry) = registry_with(&[("ping.toml", PING)]);
        registry.load_all();

        std::fs::write(dir.path().join("ping.toml"), "name = \"ping\"\ncommands = [").unwrap();
        registry.reload_one("ping.toml");
        let plugin = registry.get("ping.toml").unwrap();
        assert_eq!(plugin.name, "ping");
        assert!(matches!(plugin.response, ResponseSpec::Text { .. }));

        // fixed file replaces it
        let fixed = PING.replace("pong", "pong!");
        std::fs::write(dir.path().join("ping.toml"), fixed).unwrap();
        registry.reload_one("ping.toml");
        match registry.get("ping.toml").unwrap().response {
            ResponseSpec::Text { text } => assert_eq!(text, "pong!"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn valid_toml_with_wrong_schema_keeps_last_good_version() {
        let (dir, registry) = registry_with(&[("ping.toml", PING)]);
        registry.load_all();

        // parses as TOML, but is not a manifest
        std::fs::write(dir.path().join("ping.toml"), "title = \"oops\"").unwrap();
        registry.reload_one("ping.toml");
        assert_eq!(registry.get("ping.toml").unwrap().name, "ping");
    }

    #[test]
    fn delete_evicts_and_is_idempotent() {
        let (dir, registry) = registry_with(&[("ping.toml", PING)]);
        registry.load_all();

        std::fs::remove_file(dir.path().join("ping.toml")).unwrap();
        registry.reload_one("ping.toml");
        assert!(registry.get("ping.toml").is_none());
        registry.reload_one("ping.toml");
        assert!(registry.is_empty());
    }

    #[test]
    fn non_manifest_names_are_ignored() {
        let (_dir, registry) = registry_with(&[("ping.toml", PING)]);
        registry.load_all();
        registry.reload_one("README.md");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn validation_rejects_empty_fields() {
        let no_commands: Plugin = toml::from_str(
            "name = \"x\"\ncommands = []\n\n[response]\nkind = \"text\"\ntext = \"y\"",
        )
        .unwrap();
        assert!(no_commands.validate().is_err());

        let no_choices: Plugin = toml::from_str(
            "name = \"x\"\ncommands = [\"x\"]\n\n[response]\nkind = \"random\"\nchoices = []",
        )
        .unwrap();
        assert!(no_choices.validate().is_err());
    }
}
