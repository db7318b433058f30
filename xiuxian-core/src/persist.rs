//! Save-file persistence.
//!
//! One snapshot carries everything needed to resume a run: the canonical
//! character, the full turn log, the rolling summary with its watermark,
//! and optionally the endpoint settings. Snapshots are plain JSON so
//! players can export, hand-edit, and re-import them.

use crate::memory::{StoryMemory, TurnEntry};
use crate::state::CharacterState;
use openai_chat::Settings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// A complete game snapshot.
///
/// `character` and `turn_log` are required; a file missing either is
/// rejected at decode time, which is exactly the validation imports need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveData {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created (unix seconds, as text).
    pub saved_at: String,

    pub character: CharacterState,

    pub turn_log: Vec<TurnEntry>,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub compacted_through: usize,

    /// Endpoint settings travel with the save so an imported game is
    /// playable without reconfiguring.
    #[serde(default)]
    pub settings: Option<Settings>,
}

impl SaveData {
    /// Create a snapshot from live session state.
    pub fn new(
        character: CharacterState,
        turn_log: Vec<TurnEntry>,
        memory: &StoryMemory,
        settings: Option<Settings>,
    ) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: unix_now(),
            character,
            turn_log,
            summary: memory.summary.clone(),
            compacted_through: memory.compacted_through,
            settings,
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file, surfacing every failure. This is the import
    /// path: the user asked for this file, so a corrupt or incompatible
    /// one is reported rather than ignored.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = tokio::fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// The rolling memory recorded in this snapshot, with the watermark
    /// re-clamped to the log length in case the file was hand-edited.
    pub fn memory(&self) -> StoryMemory {
        StoryMemory {
            summary: self.summary.clone(),
            compacted_through: self.compacted_through.min(self.turn_log.len()),
        }
    }
}

/// Startup restore: a missing or unreadable save is "no saved game", not
/// an error.
pub async fn restore(path: impl AsRef<Path>) -> Option<SaveData> {
    match SaveData::load_json(&path).await {
        Ok(saved) => Some(saved),
        Err(err) => {
            tracing::debug!(error = %err, "no restorable save");
            None
        }
    }
}

/// Delete a save file. Absence is not an error.
pub async fn clear(path: impl AsRef<Path>) {
    let _ = tokio::fs::remove_file(path).await;
}

/// Auto-save file name for a given character name.
pub fn auto_save_path(base_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    let sanitized = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    base_dir.as_ref().join(format!("{sanitized}_autosave.json"))
}

/// Current timestamp as unix seconds.
fn unix_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}
