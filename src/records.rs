use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub roster: Vec<String>,
    // When the current roster was last changed, if the source knows it.
    #[serde(default)]
    pub roster_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    pub name: String,
    pub team_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub acs: Option<f64>,
    #[serde(default)]
    pub kdr: Option<f64>,
    #[serde(default)]
    pub kast: Option<f64>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub played_at: DateTime<Utc>,
    pub team_a: String,
    pub team_b: String,
    pub score_a: u32,
    pub score_b: u32,
    #[serde(default)]
    pub event: Option<String>,
}

impl MatchRecord {
    pub fn involves(&self, team_id: &str) -> bool {
        self.team_a == team_id || self.team_b == team_id
    }

    pub fn opponent_of(&self, team_id: &str) -> Option<&str> {
        if self.team_a == team_id {
            Some(&self.team_b)
        } else if self.team_b == team_id {
            Some(&self.team_a)
        } else {
            None
        }
    }

    /// 1.0 win, 0.0 loss, 0.5 draw, from `team_id`'s side.
    pub fn result_for(&self, team_id: &str) -> Option<f64> {
        let (own, other) = if self.team_a == team_id {
            (self.score_a, self.score_b)
        } else if self.team_b == team_id {
            (self.score_b, self.score_a)
        } else {
            return None;
        };
        Some(if own > other {
            1.0
        } else if own < other {
            0.0
        } else {
            0.5
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRecord {
    Team(TeamRecord),
    Player(PlayerRecord),
    Match(MatchRecord),
}

/// Frozen entity records for one tournament as of one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tournament_id: String,
    pub as_of: DateTime<Utc>,
    pub records: Vec<EntityRecord>,
}

impl Snapshot {
    pub fn teams(&self) -> impl Iterator<Item = &TeamRecord> {
        self.records.iter().filter_map(|r| match r {
            EntityRecord::Team(t) => Some(t),
            _ => None,
        })
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.records.iter().filter_map(|r| match r {
            EntityRecord::Player(p) => Some(p),
            _ => None,
        })
    }

    pub fn matches(&self) -> impl Iterator<Item = &MatchRecord> {
        self.records.iter().filter_map(|r| match r {
            EntityRecord::Match(m) => Some(m),
            _ => None,
        })
    }

    pub fn team_ids(&self) -> BTreeSet<&str> {
        self.teams().map(|t| t.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub team_id: String,
    pub placement: u32,
}

/// A resolved tournament: the snapshot taken before it started plus its final standings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTournament {
    pub snapshot: Snapshot,
    pub resolved_at: DateTime<Utc>,
    pub standings: Vec<Standing>,
}

impl HistoricalTournament {
    pub fn id(&self) -> &str {
        &self.snapshot.tournament_id
    }

    pub fn placement_of(&self, team_id: &str) -> Option<u32> {
        self.standings
            .iter()
            .find(|s| s.team_id == team_id)
            .map(|s| s.placement)
    }

    pub fn ground_truth(&self) -> Vec<GroundTruth> {
        self.standings
            .iter()
            .map(|s| GroundTruth {
                tournament_id: self.snapshot.tournament_id.clone(),
                team_id: s.team_id.clone(),
                placement: s.placement,
                resolved_at: self.resolved_at,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub tournament_id: String,
    pub team_id: String,
    pub placement: u32,
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn m(a: u32, b: u32) -> MatchRecord {
        MatchRecord {
            id: "m1".into(),
            played_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            team_a: "a".into(),
            team_b: "b".into(),
            score_a: a,
            score_b: b,
            event: None,
        }
    }

    #[test]
    fn result_is_seen_from_either_side() {
        let won = m(13, 7);
        assert_eq!(won.result_for("a"), Some(1.0));
        assert_eq!(won.result_for("b"), Some(0.0));
        assert_eq!(won.result_for("c"), None);
        assert_eq!(m(1, 1).result_for("b"), Some(0.5));
        assert_eq!(won.opponent_of("b"), Some("a"));
    }

    #[test]
    fn entity_records_are_tagged_by_kind() {
        let raw = r#"{"kind":"team","id":"t1","name":"Alpha","roster":["p1"]}"#;
        let rec: EntityRecord = serde_json::from_str(raw).expect("team record should parse");
        match rec {
            EntityRecord::Team(t) => {
                assert_eq!(t.id, "t1");
                assert_eq!(t.roster, vec!["p1".to_string()]);
                assert!(t.roster_since.is_none());
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
