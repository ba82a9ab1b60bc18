use serde::{Deserialize, Serialize};

/// Synchronization state of an enriched dataset relative to its source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Derived rows are an exact function of the current source rows
    InSync,
    /// The source accepted rows since the last recompute
    Stale,
    /// The last recompute failed structurally; only a manual sync clears it
    SyncError,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InSync => "IN_SYNC",
            SyncStatus::Stale => "STALE",
            SyncStatus::SyncError => "SYNC_ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IN_SYNC" => Some(SyncStatus::InSync),
            "STALE" => Some(SyncStatus::Stale),
            "SYNC_ERROR" => Some(SyncStatus::SyncError),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
