use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::records::{HistoricalTournament, Snapshot, Standing};

/// The data-source collaborator. Implementations own their timeouts; a failure is handed
/// back to the caller as-is and never retried here.
pub trait SnapshotSource: Send + Sync {
    fn current_snapshot(&self, tournament_id: &str) -> Result<Snapshot, SourceError>;

    /// Every resolved tournament the source knows about. Callers filter by time.
    fn historical_tournaments(&self) -> Result<Vec<HistoricalTournament>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub snapshot: Snapshot,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub standings: Vec<Standing>,
}

impl CatalogEntry {
    pub fn upcoming(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            resolved_at: None,
            standings: Vec::new(),
        }
    }

    pub fn resolved(tournament: HistoricalTournament) -> Self {
        Self {
            snapshot: tournament.snapshot,
            resolved_at: Some(tournament.resolved_at),
            standings: tournament.standings,
        }
    }

    pub fn is_historical(&self) -> bool {
        self.resolved_at.is_some() && !self.standings.is_empty()
    }

    pub fn to_historical(&self) -> Option<HistoricalTournament> {
        let resolved_at = self.resolved_at?;
        if self.standings.is_empty() {
            return None;
        }
        Some(HistoricalTournament {
            snapshot: self.snapshot.clone(),
            resolved_at,
            standings: self.standings.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    tournaments: Vec<CatalogEntry>,
}

/// In-memory tournament registry keyed by tournament id. A tournament with a resolution
/// time and standings is historical; anything else is upcoming.
#[derive(Debug, Clone, Default)]
pub struct TournamentCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl TournamentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw).context("parse tournament catalog")?;
        let mut catalog = Self::new();
        for entry in file.tournaments {
            catalog.add(entry);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read tournament catalog {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String> {
        let file = CatalogFile {
            tournaments: self.entries.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&file).context("serialize tournament catalog")
    }

    /// Replaces an existing entry with the same id.
    pub fn add(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.entries
            .insert(entry.snapshot.tournament_id.clone(), entry)
    }

    pub fn remove(&mut self, tournament_id: &str) -> Option<CatalogEntry> {
        self.entries.remove(tournament_id)
    }

    pub fn get(&self, tournament_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(tournament_id)
    }

    pub fn list(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }

    pub fn historical(&self) -> Vec<HistoricalTournament> {
        self.entries
            .values()
            .filter_map(CatalogEntry::to_historical)
            .collect()
    }

    pub fn upcoming(&self) -> Vec<&Snapshot> {
        self.entries
            .values()
            .filter(|e| !e.is_historical())
            .map(|e| &e.snapshot)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotSource for TournamentCatalog {
    fn current_snapshot(&self, tournament_id: &str) -> Result<Snapshot, SourceError> {
        self.get(tournament_id)
            .map(|e| e.snapshot.clone())
            .ok_or_else(|| SourceError::UnknownTournament(tournament_id.to_string()))
    }

    fn historical_tournaments(&self) -> Result<Vec<HistoricalTournament>, SourceError> {
        Ok(self.historical())
    }
}
