//! Published dashboard snapshot and its JSON store.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::engine::SourceFailure;
use crate::error::CalendarError;
use crate::types::{EventInstance, SchoolClosureBucket, Timeline, TravelSignal};

/// What the dashboard reads. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub generated_at: Option<NaiveDateTime>,
    pub today: Option<NaiveDate>,
    #[serde(default)]
    pub events: Vec<EventInstance>,
    #[serde(default)]
    pub current_travel: Option<TravelSignal>,
    #[serde(default)]
    pub school_closures: SchoolClosureBucket,
    #[serde(default)]
    pub failed_sources: Vec<SourceFailure>,
}

impl Snapshot {
    pub fn from_timeline(
        timeline: Timeline,
        failed_sources: Vec<SourceFailure>,
        today: NaiveDate,
        generated_at: NaiveDateTime,
    ) -> Self {
        Self {
            generated_at: Some(generated_at),
            today: Some(today),
            events: timeline.events,
            current_travel: timeline.current_travel,
            school_closures: timeline.school_closures,
            failed_sources,
        }
    }
}

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Snapshot, CalendarError>;
    fn save(&self, snapshot: &Snapshot) -> Result<(), CalendarError>;
}

/// Snapshot kept as one JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonSnapshotStore {
    /// A missing file reads as an empty snapshot.
    fn load(&self) -> Result<Snapshot, CalendarError> {
        if !self.path.exists() {
            return Ok(Snapshot::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), CalendarError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_vec_pretty(snapshot)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|e| CalendarError::Store(format!("{}: {}", self.path.display(), e)))?;

        tracing::debug!("Wrote snapshot to {}", self.path.display());
        Ok(())
    }
}
