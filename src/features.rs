use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::elo;
use crate::error::InsufficientDataError;
use crate::records::{EntityRecord, MatchRecord, PlayerRecord, Snapshot, TeamRecord};

pub const FEATURE_COUNT: usize = 9;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "roster_stability",
    "avg_rating",
    "avg_acs",
    "avg_kdr",
    "avg_kast",
    "win_rate",
    "recent_form",
    "strength_of_schedule",
    "tournament_results",
];

pub const ROSTER_STABILITY: usize = 0;
pub const AVG_RATING: usize = 1;
pub const AVG_ACS: usize = 2;
pub const AVG_KDR: usize = 3;
pub const AVG_KAST: usize = 4;
pub const WIN_RATE: usize = 5;
pub const RECENT_FORM: usize = 6;
pub const STRENGTH_OF_SCHEDULE: usize = 7;
pub const TOURNAMENT_RESULTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    RosterStability,
    IndividualPerformance,
    TeamPerformance,
    StrengthOfSchedule,
}

pub const FEATURE_GROUPS: [FeatureGroup; FEATURE_COUNT] = [
    FeatureGroup::RosterStability,
    FeatureGroup::IndividualPerformance,
    FeatureGroup::IndividualPerformance,
    FeatureGroup::IndividualPerformance,
    FeatureGroup::IndividualPerformance,
    FeatureGroup::TeamPerformance,
    FeatureGroup::TeamPerformance,
    FeatureGroup::StrengthOfSchedule,
    FeatureGroup::TeamPerformance,
];

/// Used only when no team in the cohort has a value for the column.
pub const NEUTRAL_DEFAULTS: [f64; FEATURE_COUNT] = [0.5, 1.0, 200.0, 1.0, 0.70, 0.5, 0.5, 0.0, 0.5];

pub type FeatureRow = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub team_id: String,
    pub values: FeatureRow,
    pub matches_played: usize,
    pub low_sample: bool,
    pub imputed: [bool; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.values[idx])
    }
}

/// One row per team, ordered by team id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn from_rows(mut rows: Vec<FeatureVector>) -> Self {
        rows.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        rows.dedup_by(|a, b| a.team_id == b.team_id);
        Self { rows }
    }

    pub fn names(&self) -> &'static [&'static str; FEATURE_COUNT] {
        &FEATURE_NAMES
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn values(&self) -> Vec<FeatureRow> {
        self.rows.iter().map(|r| r.values).collect()
    }

    pub fn team_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.team_id.as_str()).collect()
    }

    pub fn get(&self, team_id: &str) -> Option<&FeatureVector> {
        self.rows.iter().find(|r| r.team_id == team_id)
    }

    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.values[idx]).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuild {
    pub matrix: FeatureMatrix,
    pub insufficient: Vec<InsufficientDataError>,
}

pub fn build_snapshot_features(snapshot: &Snapshot, cfg: &PipelineConfig) -> FeatureBuild {
    build_features(&snapshot.records, snapshot.as_of, cfg)
}

/// Pure function of its inputs: the same records and `as_of` always produce the same
/// matrix. Teams without a single match before `as_of` are reported, not featurized.
pub fn build_features(
    records: &[EntityRecord],
    as_of: DateTime<Utc>,
    cfg: &PipelineConfig,
) -> FeatureBuild {
    let mut teams: BTreeMap<&str, &TeamRecord> = BTreeMap::new();
    let mut players: Vec<&PlayerRecord> = Vec::new();
    let mut matches: Vec<&MatchRecord> = Vec::new();
    for record in records {
        match record {
            EntityRecord::Team(t) => {
                teams.entry(t.id.as_str()).or_insert(t);
            }
            EntityRecord::Player(p) => players.push(p),
            EntityRecord::Match(m) => {
                if m.played_at < as_of {
                    matches.push(m);
                }
            }
        }
    }

    let ratings = elo::ratings_as_of(matches.iter().copied(), as_of, cfg.elo);

    let mut raw_rows: Vec<(String, [Option<f64>; FEATURE_COUNT], usize)> = Vec::new();
    let mut insufficient = Vec::new();
    for (team_id, team) in &teams {
        let team_matches: Vec<&MatchRecord> = matches
            .iter()
            .copied()
            .filter(|m| m.involves(team_id) && m.team_a != m.team_b)
            .collect();
        if team_matches.is_empty() {
            log::warn!("team {team_id} has no matches before {as_of}; excluded from run");
            insufficient.push(InsufficientDataError {
                team_id: team_id.to_string(),
            });
            continue;
        }

        let roster = roster_players(team, &players);
        let mut raw = [None; FEATURE_COUNT];
        raw[ROSTER_STABILITY] = roster_stability(team, &roster, as_of, cfg);
        raw[AVG_RATING] = mean_stat(&roster, |p| p.rating);
        raw[AVG_ACS] = mean_stat(&roster, |p| p.acs);
        raw[AVG_KDR] = mean_stat(&roster, |p| p.kdr);
        raw[AVG_KAST] = mean_stat(&roster, |p| p.kast);
        raw[WIN_RATE] = win_rate(team_id, &team_matches);
        raw[RECENT_FORM] = recent_form(team_id, &team_matches, as_of, cfg.recency_half_life_days);
        raw[STRENGTH_OF_SCHEDULE] =
            strength_of_schedule(team_id, &team_matches, &ratings, cfg.elo.base);
        raw[TOURNAMENT_RESULTS] =
            tournament_results(team_id, &team_matches, &cfg.tournament_event_markers);

        raw_rows.push((team_id.to_string(), raw, team_matches.len()));
    }

    let fill = cohort_fill_values(raw_rows.iter().map(|(_, raw, _)| raw));
    let rows = raw_rows
        .into_iter()
        .map(|(team_id, raw, matches_played)| {
            let mut values = [0.0; FEATURE_COUNT];
            let mut imputed = [false; FEATURE_COUNT];
            for idx in 0..FEATURE_COUNT {
                match raw[idx] {
                    Some(v) if v.is_finite() => values[idx] = v,
                    _ => {
                        values[idx] = fill[idx];
                        imputed[idx] = true;
                    }
                }
            }
            FeatureVector {
                team_id,
                values,
                matches_played,
                low_sample: matches_played < cfg.low_sample_min_matches,
                imputed,
            }
        })
        .collect();

    FeatureBuild {
        matrix: FeatureMatrix { rows },
        insufficient,
    }
}

/// Roughly [0, 1]; higher means a stronger team. Blends the four groups into one number.
/// Tournament-tier results only count in proportion to the schedule they were earned
/// against.
pub fn team_strength_index(row: &FeatureRow) -> f64 {
    let skill = ((row[AVG_RATING] - 0.7) / 0.6).clamp(0.0, 1.0);
    let kast = row[AVG_KAST].clamp(0.0, 1.0);
    let individual = 0.7 * skill + 0.3 * kast;
    let schedule = (0.5 + row[STRENGTH_OF_SCHEDULE] / 2.0).clamp(0.0, 1.0);
    let tournament_impact = row[TOURNAMENT_RESULTS].clamp(0.0, 1.0) * schedule;
    0.30 * individual
        + 0.25 * row[WIN_RATE]
        + 0.20 * row[RECENT_FORM]
        + 0.15 * row[ROSTER_STABILITY]
        + 0.10 * tournament_impact
}

fn roster_players<'a>(team: &TeamRecord, players: &[&'a PlayerRecord]) -> Vec<&'a PlayerRecord> {
    if team.roster.is_empty() {
        return players
            .iter()
            .copied()
            .filter(|p| p.team_id == team.id)
            .collect();
    }
    let wanted: HashSet<&str> = team.roster.iter().map(|s| s.as_str()).collect();
    let mut seen = HashSet::new();
    players
        .iter()
        .copied()
        .filter(|p| wanted.contains(p.id.as_str()) && seen.insert(p.id.as_str()))
        .collect()
}

fn roster_stability(
    team: &TeamRecord,
    roster: &[&PlayerRecord],
    as_of: DateTime<Utc>,
    cfg: &PipelineConfig,
) -> Option<f64> {
    // The roster is unchanged since the most recent arrival.
    let since = team
        .roster_since
        .or_else(|| roster.iter().filter_map(|p| p.joined_at).max())?;
    let days = ((as_of - since).num_seconds() as f64 / 86_400.0).max(0.0);
    let horizon = cfg.stability_horizon_days.max(1.0);
    let roster_len = if team.roster.is_empty() {
        roster.len()
    } else {
        team.roster.len()
    };
    let completeness = (roster_len as f64 / cfg.full_roster_size.max(1) as f64).min(1.0);
    Some((days / horizon).min(1.0) * completeness)
}

fn mean_stat<F>(roster: &[&PlayerRecord], stat: F) -> Option<f64>
where
    F: Fn(&PlayerRecord) -> Option<f64>,
{
    let values: Vec<f64> = roster
        .iter()
        .filter_map(|p| stat(*p))
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn win_rate(team_id: &str, matches: &[&MatchRecord]) -> Option<f64> {
    let results: Vec<f64> = matches.iter().filter_map(|m| m.result_for(team_id)).collect();
    if results.is_empty() {
        return None;
    }
    Some(results.iter().sum::<f64>() / results.len() as f64)
}

/// Win share over matches whose event name contains one of `markers`
/// (case-insensitive). `None` when the team played no such match.
fn tournament_results(team_id: &str, matches: &[&MatchRecord], markers: &[String]) -> Option<f64> {
    let markers: Vec<String> = markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect();
    if markers.is_empty() {
        return None;
    }
    let results: Vec<f64> = matches
        .iter()
        .filter(|m| {
            m.event.as_deref().is_some_and(|event| {
                let event = event.to_lowercase();
                markers.iter().any(|marker| event.contains(marker.as_str()))
            })
        })
        .filter_map(|m| m.result_for(team_id))
        .collect();
    if results.is_empty() {
        return None;
    }
    Some(results.iter().sum::<f64>() / results.len() as f64)
}

fn recent_form(
    team_id: &str,
    matches: &[&MatchRecord],
    as_of: DateTime<Utc>,
    half_life_days: f64,
) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for m in matches {
        let Some(result) = m.result_for(team_id) else {
            continue;
        };
        let age_days = ((as_of - m.played_at).num_seconds() as f64 / 86_400.0).max(0.0);
        let w = recency_weight(age_days, half_life_days);
        weighted += w * result;
        weight_sum += w;
    }
    if weight_sum <= 0.0 {
        return None;
    }
    Some(weighted / weight_sum)
}

pub fn recency_weight(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let decay = -(std::f64::consts::LN_2 * age_days.max(0.0) / half_life_days);
    decay.exp().clamp(0.05, 1.0)
}

fn strength_of_schedule(
    team_id: &str,
    matches: &[&MatchRecord],
    ratings: &HashMap<String, f64>,
    base: f64,
) -> Option<f64> {
    let opponents: Vec<f64> = matches
        .iter()
        .filter_map(|m| m.opponent_of(team_id))
        .map(|opp| ratings.get(opp).copied().unwrap_or(base))
        .collect();
    if opponents.is_empty() {
        return None;
    }
    let mean = opponents.iter().sum::<f64>() / opponents.len() as f64;
    Some((mean - base) / 400.0)
}

fn cohort_fill_values<'a, I>(rows: I) -> FeatureRow
where
    I: Iterator<Item = &'a [Option<f64>; FEATURE_COUNT]>,
{
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); FEATURE_COUNT];
    for raw in rows {
        for (idx, value) in raw.iter().enumerate() {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                columns[idx].push(v);
            }
        }
    }
    let mut fill = NEUTRAL_DEFAULTS;
    for (idx, column) in columns.iter_mut().enumerate() {
        if let Some(m) = median(column) {
            fill[idx] = m;
        }
    }
    fill
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_weight_halves_at_half_life() {
        assert!((recency_weight(0.0, 30.0) - 1.0).abs() < 1e-12);
        assert!((recency_weight(30.0, 30.0) - 0.5).abs() < 1e-12);
        assert!((recency_weight(10_000.0, 30.0) - 0.05).abs() < 1e-12);
        assert_eq!(recency_weight(12.0, 0.0), 1.0);
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn strength_index_orders_obvious_cases() {
        let strong = [1.0, 1.25, 240.0, 1.3, 0.78, 0.85, 0.9, 0.1, 0.8];
        let weak = [0.2, 0.85, 170.0, 0.8, 0.62, 0.2, 0.1, -0.1, 0.3];
        assert!(team_strength_index(&strong) > team_strength_index(&weak));
    }

    #[test]
    fn tournament_results_scale_with_schedule() {
        let mut soft = [0.5, 1.0, 200.0, 1.0, 0.7, 0.5, 0.5, -0.5, 1.0];
        let mut hard = soft;
        hard[STRENGTH_OF_SCHEDULE] = 0.5;
        assert!(team_strength_index(&hard) > team_strength_index(&soft));
        soft[TOURNAMENT_RESULTS] = 0.0;
        hard[TOURNAMENT_RESULTS] = 0.0;
        assert!((team_strength_index(&hard) - team_strength_index(&soft)).abs() < 1e-12);
    }
}
