//! Review history: completed and failed generations, with user feedback.
//!
//! Pending entries live only in memory. The pending → complete/error
//! transition is the single write per id; afterwards only rating and notes
//! change. The database is the only source of truth; nothing is cached here.
//!
//! Storage failures are logged and swallowed. A generation never fails
//! because it could not be saved.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::legacy;
use crate::pipeline::GenerationResult;
use crate::store::{Database, HistoryRow, StoreError};

const LEGACY_MIGRATED_KEY: &str = "legacy_history_migrated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Pending,
    Complete,
    Error,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    fn settled(result: &GenerationResult) -> Self {
        if result.is_error() {
            Self::Error
        } else {
            Self::Complete
        }
    }
}

/// A 1-4 user rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("rating must be 1-4, got {value}"))
        }
    }
}

impl From<Rating> for u8 {
    fn from(r: Rating) -> u8 {
        r.0
    }
}

/// What the generation was configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub result: GenerationResult,
    pub config_snapshot: ConfigSnapshot,
    pub status: HistoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl HistoryEntry {
    fn to_row(&self) -> Result<HistoryRow, StoreError> {
        Ok(HistoryRow {
            id: self.id.clone(),
            timestamp_ms: self.timestamp.timestamp_millis(),
            status: self.status.as_str().to_string(),
            payload: serde_json::to_string(self)?,
        })
    }

    /// Parse and validate a stored row. Pending rows and id mismatches are
    /// rejected; legacy flat metadata is upgraded in place.
    fn from_row(row: &HistoryRow) -> Result<Self, String> {
        let mut value: serde_json::Value =
            serde_json::from_str(&row.payload).map_err(|e| e.to_string())?;
        legacy::upgrade_stored_metadata(&mut value);
        let entry: HistoryEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if entry.id != row.id {
            return Err(format!("payload id {} does not match row id", entry.id));
        }
        if entry.status == HistoryStatus::Pending {
            return Err("pending entries are never stored".into());
        }
        Ok(entry)
    }
}

static PENDING_SEQ: AtomicU64 = AtomicU64::new(0);

/// New in-memory id: `{unix_ms}-{seq:016x}{random}`. Pure; nothing is written.
/// The fixed-width sequence keeps ids from one millisecond in creation order
/// when compared as text.
pub fn create_pending_id() -> String {
    let seq = PENDING_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}-{seq:016x}{suffix}", Utc::now().timestamp_millis())
}

/// Creation time encoded in a pending id, if it has one.
fn id_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let ms: i64 = id.split('-').next()?.parse().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}

pub struct HistoryStore {
    db: Database,
    max_entries: usize,
    legacy_path: Option<PathBuf>,
    migrated: OnceCell<()>,
}

impl HistoryStore {
    pub fn new(db: Database, max_entries: usize) -> Self {
        Self {
            db,
            max_entries,
            legacy_path: None,
            migrated: OnceCell::new(),
        }
    }

    /// Legacy JSON history file to import on first load.
    pub fn with_legacy_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_path = Some(path.into());
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Persist a settled generation. Status follows `result.error`. A second
    /// save for the same id is ignored.
    pub async fn save_completed(&self, id: &str, result: GenerationResult, config_snapshot: ConfigSnapshot) {
        let entry = HistoryEntry {
            id: id.to_string(),
            timestamp: id_timestamp(id).unwrap_or_else(Utc::now),
            status: HistoryStatus::settled(&result),
            result,
            config_snapshot,
            rating: None,
            notes: None,
        };
        if let Err(e) = self.try_save(&entry).await {
            tracing::warn!(id, error = %e, "failed to save history entry");
        }
    }

    async fn try_save(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let inserted = self.db.insert_history(entry.to_row()?).await?;
        if !inserted {
            tracing::warn!(id = %entry.id, "history entry already saved; ignoring");
            return Ok(());
        }
        let pruned = self.db.prune_history(self.max_entries).await?;
        if pruned > 0 {
            tracing::debug!(pruned, max = self.max_entries, "pruned old history entries");
        }
        Ok(())
    }

    /// Set rating (and notes, if given). Unknown ids are a warning, not an error.
    pub async fn update_rating(&self, id: &str, rating: Rating, notes: Option<String>) {
        match self.try_update_rating(id, rating, notes).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(id, "rating update for unknown history entry"),
            Err(e) => tracing::warn!(id, error = %e, "failed to update rating"),
        }
    }

    async fn try_update_rating(
        &self,
        id: &str,
        rating: Rating,
        notes: Option<String>,
    ) -> Result<bool, StoreError> {
        let Some(row) = self.db.get_history(id).await? else {
            return Ok(false);
        };
        let mut entry = match HistoryEntry::from_row(&row) {
            Ok(entry) => entry,
            Err(reason) => {
                tracing::warn!(id, reason = %reason, "stored history entry is invalid");
                return Ok(false);
            }
        };
        entry.rating = Some(rating);
        if notes.is_some() {
            entry.notes = notes;
        }
        self.db
            .update_history_payload(id, serde_json::to_string(&entry)?)
            .await
    }

    /// Every valid entry, newest first. Invalid records are skipped.
    pub async fn load_all(&self) -> Vec<HistoryEntry> {
        self.ensure_migrated().await;
        let rows = match self.db.list_history().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load history");
                return Vec::new();
            }
        };
        rows.iter()
            .filter_map(|row| match HistoryEntry::from_row(row) {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    tracing::warn!(id = %row.id, reason = %reason, "skipping invalid history entry");
                    None
                }
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<HistoryEntry> {
        self.ensure_migrated().await;
        match self.db.get_history(id).await {
            Ok(row) => row.and_then(|row| HistoryEntry::from_row(&row).ok()),
            Err(e) => {
                tracing::warn!(id, error = %e, "failed to read history entry");
                None
            }
        }
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.db.delete_history(id).await.unwrap_or_else(|e| {
            tracing::warn!(id, error = %e, "failed to delete history entry");
            false
        })
    }

    pub async fn clear(&self) {
        if let Err(e) = self.db.clear_history().await {
            tracing::warn!(error = %e, "failed to clear history");
        }
    }

    // =========================================================================
    // legacy migration
    // =========================================================================

    async fn ensure_migrated(&self) {
        self.migrated
            .get_or_init(|| async {
                if let Err(e) = self.migrate_legacy().await {
                    tracing::warn!(error = %e, "legacy history migration failed");
                }
            })
            .await;
    }

    async fn migrate_legacy(&self) -> Result<(), StoreError> {
        if self.db.get_meta(LEGACY_MIGRATED_KEY).await?.is_some() {
            return Ok(());
        }

        let mut imported = 0usize;
        if let Some(path) = &self.legacy_path {
            match tokio::fs::read_to_string(path).await {
                Ok(raw) => {
                    for entry in legacy::parse_legacy_history(&raw) {
                        if self.db.insert_history(entry.to_row()?).await? {
                            imported += 1;
                        }
                    }
                    self.db.prune_history(self.max_entries).await?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.db.set_meta(LEGACY_MIGRATED_KEY, &Utc::now().to_rfc3339()).await?;
        tracing::info!(imported, "legacy history migration finished");
        Ok(())
    }
}
