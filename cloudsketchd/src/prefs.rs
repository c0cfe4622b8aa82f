use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preferences file is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Externally persisted confirmation preferences. Each flag guards one
/// confirmation prompt and is flipped off by an "accept, don't ask again"
/// answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPrefs {
    pub warn_before_pull: bool,
    pub warn_before_push: bool,
    pub warn_before_push_public: bool,
}

impl Default for SyncPrefs {
    fn default() -> Self {
        Self {
            warn_before_pull: true,
            warn_before_push: true,
            warn_before_push_public: true,
        }
    }
}

impl SyncPrefs {
    /// Load persisted preferences; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, PrefsError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PrefsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Accepted,
    AcceptedDontAskAgain,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    /// Pulling over an existing local mirror overwrites local edits.
    PullOverwrite { sketch: String },
    /// Pushing overwrites the remote copy of the sketch.
    PushOverwrite { sketch: String },
    /// Pushing a public sketch may expose sensitive data.
    PushPublic { sketch: String },
}

/// Answers confirmation prompts on behalf of the user. The engine never
/// renders dialogs; the embedding shell decides how to ask.
pub trait ConfirmationGate: Send + Sync {
    fn confirm(&self, request: &ConfirmRequest) -> Confirmation;
}

/// Gate that accepts everything; used by non-interactive callers.
pub struct AcceptAll;

impl ConfirmationGate for AcceptAll {
    fn confirm(&self, _request: &ConfirmRequest) -> Confirmation {
        Confirmation::Accepted
    }
}
