//! Thread manager: which server thread the session talks to, and its
//! persistence in `session.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::{ThreadId, WorkflowClient};
use crate::config::paths;
use crate::error::{ClientError, ClientResult};
use crate::transport::CancelToken;

/// Client state that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// JSON file holding a `PersistedSession`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$HITL_HOME/session.json`.
    pub fn default_location() -> Self {
        Self::new(paths::session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file; a missing file is an empty session.
    pub fn load(&self) -> Result<PersistedSession> {
        if !self.path.exists() {
            return Ok(PersistedSession::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session from {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session from {}", self.path.display()))
    }

    /// Writes via a temp file and rename so a crash never leaves half a file.
    pub fn save(&self, session: &PersistedSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write session to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                self.path.display()
            )
        })
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to remove session {}", self.path.display())),
        }
    }
}

/// Where an operation gets its thread from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadSource {
    /// Create a fresh thread on the server.
    Create,
    Existing(ThreadId),
}

impl ThreadSource {
    /// Produces the thread id, creating one on the server if needed.
    ///
    /// # Errors
    /// Returns the create RPC's error, or a cancellation error if the token
    /// fires first.
    pub async fn obtain(self, client: &WorkflowClient, cancel: &CancelToken) -> ClientResult<ThreadId> {
        match self {
            ThreadSource::Existing(thread) => Ok(thread),
            ThreadSource::Create => {
                cancel.check()?;
                tokio::select! {
                    () = cancel.cancelled() => Err(cancel.error()),
                    created = client.create_thread() => created,
                }
            }
        }
    }
}

/// Owns the current thread id and last topic.
#[derive(Debug)]
pub struct ThreadManager {
    store: SessionStore,
    current: Option<ThreadId>,
    topic: Option<String>,
}

impl ThreadManager {
    /// Loads persisted state. An unreadable file is logged and treated as empty.
    pub fn load(store: SessionStore) -> Self {
        let persisted = store.load().unwrap_or_else(|err| {
            tracing::warn!(error = %format!("{err:#}"), "ignoring unreadable session file");
            PersistedSession::default()
        });
        Self {
            store,
            current: persisted.thread_id,
            topic: persisted.topic,
        }
    }

    pub fn current(&self) -> Option<&ThreadId> {
        self.current.as_ref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Decides where the next operation's thread comes from.
    ///
    /// A start always gets a fresh thread. A resume reuses the current one.
    ///
    /// # Errors
    /// Returns a configuration error when resuming without a thread.
    pub fn resolve(&self, force_new: bool) -> ClientResult<ThreadSource> {
        if force_new {
            return Ok(ThreadSource::Create);
        }
        self.current
            .clone()
            .map(ThreadSource::Existing)
            .ok_or_else(|| {
                ClientError::configuration("No thread to resume; start a run first")
            })
    }

    /// Records the thread of the current operation (and its topic) and saves it.
    pub fn persist(&mut self, thread: ThreadId, topic: Option<&str>) -> Result<()> {
        self.current = Some(thread);
        if let Some(topic) = topic {
            self.topic = Some(topic.to_string());
        }
        self.save()
    }

    /// Drops a thread that is no longer pending. The topic is kept.
    pub fn discard(&mut self) -> Result<()> {
        self.current = None;
        self.save()
    }

    /// Forgets everything, including the file.
    pub fn clear(&mut self) -> Result<()> {
        self.current = None;
        self.topic = None;
        self.store.clear()
    }

    fn save(&self) -> Result<()> {
        self.store.save(&PersistedSession {
            thread_id: self.current.clone(),
            topic: self.topic.clone(),
        })
    }
}
