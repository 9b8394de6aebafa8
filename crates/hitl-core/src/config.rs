//! Configuration management for hitl.
//!
//! Loads configuration from ${HITL_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml_edit::{DocumentMut, Item, Table};

/// Default config template with comments, embedded at compile time.
const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../default_config.toml");

pub mod paths {
    //! Path resolution for hitl configuration and state.
    //!
    //! HITL_HOME resolution order:
    //! 1. HITL_HOME environment variable (if set)
    //! 2. ~/.config/hitl (default)
    //! 3. ./.hitl when no home directory can be determined

    use std::path::PathBuf;

    pub fn hitl_home() -> PathBuf {
        if let Ok(home) = std::env::var("HITL_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".hitl"),
            |h| h.join(".config").join("hitl"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        hitl_home().join("config.toml")
    }

    /// Returns the path to the persisted session (thread id and topic).
    pub fn session_path() -> PathBuf {
        hitl_home().join("session.json")
    }

    /// Returns the directory holding rolling log files.
    pub fn logs_dir() -> PathBuf {
        hitl_home().join("logs")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workflow server base URL
    pub base_url: String,

    /// Graph id sent as `assistant_id`
    pub assistant_id: String,

    /// Topic used when `start` gets a blank one
    pub default_topic: String,

    /// Stream timeout in seconds (0 disables)
    pub stream_timeout_secs: u64,

    pub interpret: InterpretConfig,

    pub journal: JournalConfig,
}

/// Event interpreter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpretConfig {
    /// Emit raw events for noise and unrecognised frames
    pub verbose: bool,

    /// Node-result summary length in grapheme clusters
    pub summary_chars: usize,

    pub noise_events: Vec<String>,

    /// Workflow node identifiers reported as node results
    pub node_keys: Vec<String>,

    /// Message-array fields searched, in order, for a node's output
    pub message_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub capacity: usize,
}

impl Config {
    pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:2024";
    const DEFAULT_ASSISTANT_ID: &str = "agent";
    const DEFAULT_TOPIC: &str = "Space debris recovery business";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        if self.stream_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.stream_timeout_secs))
        }
    }

    /// Resolves the server base URL: explicit override (CLI flag or
    /// `HITL_BASE_URL`) first, then the config value.
    ///
    /// # Errors
    /// Fails if the winning value is not an absolute http(s) URL.
    pub fn effective_base_url(&self, override_url: Option<&str>) -> Result<String> {
        let raw = override_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.base_url.trim());

        let parsed =
            url::Url::parse(raw).with_context(|| format!("Invalid server base URL '{raw}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Server base URL must use http or https, got '{raw}'");
        }

        Ok(raw.trim_end_matches('/').to_string())
    }

    /// Topic to start with: the given one unless blank.
    pub fn topic_or_default<'a>(&'a self, topic: Option<&'a str>) -> &'a str {
        topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.default_topic)
    }

    /// Initializes a new config file at the given path.
    /// Fails if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, DEFAULT_CONFIG_TEMPLATE)
    }

    /// Renders this configuration onto the commented template.
    ///
    /// Values come from `self`; comments and layout come from the template.
    pub fn generate(&self) -> Result<String> {
        let mut doc: DocumentMut = DEFAULT_CONFIG_TEMPLATE
            .parse()
            .context("Failed to parse default config template")?;
        let current: DocumentMut = toml::to_string(self)
            .context("Failed to serialize config")?
            .parse()
            .context("Failed to re-parse serialized config")?;

        merge_tables(doc.as_table_mut(), current.as_table());
        Ok(doc.to_string())
    }

    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

/// Copies values from `src` into `dst`, keeping the comments attached to `dst`.
fn merge_tables(dst: &mut Table, src: &Table) {
    for (key, item) in src {
        match (dst.get_mut(key), item) {
            (Some(Item::Table(dst_table)), Item::Table(src_table)) => {
                merge_tables(dst_table, src_table);
            }
            (Some(Item::Value(dst_value)), Item::Value(src_value)) => {
                let decor = dst_value.decor().clone();
                *dst_value = src_value.clone();
                *dst_value.decor_mut() = decor;
            }
            _ => {
                dst.insert(key, item.clone());
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            assistant_id: Self::DEFAULT_ASSISTANT_ID.to_string(),
            default_topic: Self::DEFAULT_TOPIC.to_string(),
            stream_timeout_secs: 0,
            interpret: InterpretConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl Default for InterpretConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            summary_chars: 140,
            noise_events: to_strings(&["metadata", "ping", "keepalive"]),
            node_keys: to_strings(&[
                "research_agent",
                "tools",
                "summary_agent",
                "market_agent",
                "technical_agent",
                "human_approval",
                "report_agent",
            ]),
            message_fields: to_strings(&["analysis_messages", "research_messages", "messages"]),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { capacity: 80 }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
