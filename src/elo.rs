use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::MatchRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloConfig {
    pub k: f64,
    pub base: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 32.0,
            base: 1500.0,
        }
    }
}

/// Replays every match played strictly before `as_of` in chronological order.
pub fn ratings_as_of<'a, I>(matches: I, as_of: DateTime<Utc>, cfg: EloConfig) -> HashMap<String, f64>
where
    I: IntoIterator<Item = &'a MatchRecord>,
{
    let mut played: Vec<&MatchRecord> = matches
        .into_iter()
        .filter(|m| m.played_at < as_of)
        .filter(|m| m.team_a != m.team_b)
        .collect();
    played.sort_by(|a, b| a.played_at.cmp(&b.played_at).then(a.id.cmp(&b.id)));

    let mut elo: HashMap<String, f64> = HashMap::new();
    for m in played {
        let ea = *elo.entry(m.team_a.clone()).or_insert(cfg.base);
        let eb = *elo.entry(m.team_b.clone()).or_insert(cfg.base);

        let expected_a = expected_score(ea, eb);
        let s_a = if m.score_a > m.score_b {
            1.0
        } else if m.score_a < m.score_b {
            0.0
        } else {
            0.5
        };

        let delta = cfg.k * (s_a - expected_a);
        elo.insert(m.team_a.clone(), ea + delta);
        elo.insert(m.team_b.clone(), eb - delta);
    }

    elo
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn game(id: &str, day: i64, a: &str, b: &str, sa: u32, sb: u32) -> MatchRecord {
        MatchRecord {
            id: id.into(),
            played_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
            team_a: a.into(),
            team_b: b.into(),
            score_a: sa,
            score_b: sb,
            event: None,
        }
    }

    #[test]
    fn winner_gains_what_loser_drops() {
        let games = vec![game("g1", 0, "a", "b", 2, 0)];
        let as_of = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let elo = ratings_as_of(&games, as_of, EloConfig::default());
        let a = elo["a"];
        let b = elo["b"];
        assert!(a > 1500.0);
        assert!((a - 1500.0 - (1500.0 - b)).abs() < 1e-9);
    }

    #[test]
    fn matches_on_or_after_snapshot_are_ignored() {
        let games = vec![game("g1", 0, "a", "b", 2, 0), game("g2", 40, "b", "a", 2, 0)];
        let as_of = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let elo = ratings_as_of(&games, as_of, EloConfig::default());
        assert!(elo["a"] > elo["b"]);
    }
}
