use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::records::{
    EntityRecord, HistoricalTournament, MatchRecord, PlayerRecord, Snapshot, Standing, TeamRecord,
};
use crate::source::{CatalogEntry, TournamentCatalog};

const ROLES: [&str; 5] = ["duelist", "initiator", "controller", "sentinel", "flex"];

/// A league where team 1 is the strongest and strength falls off linearly. With
/// `upset_rate` at zero the stronger side always wins and final standings follow strength
/// exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticLeague {
    pub teams: usize,
    pub history: usize,
    pub rounds: usize,
    pub spacing_days: i64,
    pub window_days: i64,
    pub resolve_after_days: i64,
    pub upset_rate: f64,
    pub start: DateTime<Utc>,
    pub seed: u64,
}

impl Default for SyntheticLeague {
    fn default() -> Self {
        Self {
            teams: 8,
            history: 3,
            rounds: 2,
            spacing_days: 60,
            window_days: 45,
            resolve_after_days: 10,
            upset_rate: 0.0,
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            seed: 7,
        }
    }
}

impl SyntheticLeague {
    pub fn team_id(idx: usize) -> String {
        format!("team_{:02}", idx + 1)
    }

    pub fn tournament_id(idx: usize) -> String {
        format!("split_{:02}", idx + 1)
    }

    /// Id of the tournament that has not been played yet.
    pub fn current_id(&self) -> String {
        Self::tournament_id(self.history)
    }

    fn strength(&self, idx: usize) -> f64 {
        if self.teams <= 1 {
            return 1.0;
        }
        1.0 - idx as f64 / (self.teams - 1) as f64
    }

    fn as_of(&self, tournament: usize) -> DateTime<Utc> {
        self.start + Duration::days(self.window_days + self.spacing_days * tournament as i64)
    }

    pub fn snapshot(&self, tournament: usize, rng: &mut StdRng) -> Snapshot {
        let as_of = self.as_of(tournament);
        let tournament_id = Self::tournament_id(tournament);
        let mut records = Vec::new();

        for t in 0..self.teams {
            let team_id = Self::team_id(t);
            let roster: Vec<String> = (0..ROLES.len())
                .map(|p| format!("{team_id}_p{}", p + 1))
                .collect();
            records.push(EntityRecord::Team(TeamRecord {
                id: team_id.clone(),
                name: format!("Team {}", t + 1),
                region: Some(if t % 2 == 0 { "emea" } else { "americas" }.to_string()),
                roster: roster.clone(),
                roster_since: None,
            }));

            let s = self.strength(t);
            for (p, player_id) in roster.into_iter().enumerate() {
                let jitter = if self.upset_rate > 0.0 {
                    rng.gen_range(-self.upset_rate..self.upset_rate) * 0.1
                } else {
                    0.0
                };
                records.push(EntityRecord::Player(PlayerRecord {
                    id: player_id,
                    name: format!("{} {}", ROLES[p], t + 1),
                    team_id: team_id.clone(),
                    role: Some(ROLES[p].to_string()),
                    rating: Some(0.85 + 0.4 * s + jitter),
                    acs: Some(170.0 + 80.0 * s),
                    kdr: Some(0.8 + 0.5 * s),
                    kast: Some(0.62 + 0.16 * s),
                    joined_at: Some(self.start - Duration::days(120 + 30 * p as i64)),
                }));
            }
        }

        let pairs: Vec<(usize, usize)> = (0..self.rounds)
            .flat_map(|_| (0..self.teams).flat_map(move |a| (a + 1..self.teams).map(move |b| (a, b))))
            .collect();
        let window_minutes = self.window_days * 24 * 60;
        let step = window_minutes / pairs.len().max(1) as i64;
        let opens = as_of - Duration::days(self.window_days);
        for (n, (a, b)) in pairs.into_iter().enumerate() {
            let upset = self.upset_rate > 0.0 && rng.gen_bool(self.upset_rate.clamp(0.0, 1.0));
            let a_wins = (a < b) != upset;
            let loser_rounds = rng.gen_range(3..12);
            let (score_a, score_b) = if a_wins {
                (13, loser_rounds)
            } else {
                (loser_rounds, 13)
            };
            records.push(EntityRecord::Match(MatchRecord {
                id: format!("{tournament_id}_m{:03}", n + 1),
                played_at: opens + Duration::minutes(step * n as i64),
                team_a: Self::team_id(a),
                team_b: Self::team_id(b),
                score_a,
                score_b,
                event: Some(tournament_id.clone()),
            }));
        }

        Snapshot {
            tournament_id,
            as_of,
            records,
        }
    }

    fn standings(&self, rng: &mut StdRng) -> Vec<Standing> {
        let mut order: Vec<usize> = (0..self.teams).collect();
        if self.upset_rate > 0.0 {
            for i in 0..order.len().saturating_sub(1) {
                if rng.gen_bool(self.upset_rate.clamp(0.0, 1.0)) {
                    order.swap(i, i + 1);
                }
            }
        }
        order
            .into_iter()
            .enumerate()
            .map(|(place, team)| Standing {
                team_id: Self::team_id(team),
                placement: place as u32 + 1,
            })
            .collect()
    }

    /// `history` resolved tournaments followed by one upcoming tournament.
    pub fn catalog(&self) -> TournamentCatalog {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut catalog = TournamentCatalog::new();
        for t in 0..self.history {
            let snapshot = self.snapshot(t, &mut rng);
            let resolved_at = snapshot.as_of + Duration::days(self.resolve_after_days);
            catalog.add(CatalogEntry::resolved(HistoricalTournament {
                snapshot,
                resolved_at,
                standings: self.standings(&mut rng),
            }));
        }
        let current = self.snapshot(self.history, &mut rng);
        catalog.add(CatalogEntry::upcoming(current));
        catalog
    }
}

/// Removes every match the team took part in, keeping its team and player records.
pub fn drop_matches_for(snapshot: &mut Snapshot, team_id: &str) {
    snapshot.records.retain(|r| match r {
        EntityRecord::Match(m) => !m.involves(team_id),
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SnapshotSource;

    #[test]
    fn default_league_shape() {
        let league = SyntheticLeague::default();
        let catalog = league.catalog();
        assert_eq!(catalog.len(), 4);
        let history = catalog.historical_tournaments().expect("history");
        assert_eq!(history.len(), 3);
        let current = catalog.current_snapshot(&league.current_id()).expect("current");
        assert_eq!(current.team_ids().len(), 8);
        for team in current.team_ids() {
            assert_eq!(current.matches().filter(|m| m.involves(team)).count(), 14);
        }
        assert!(history.iter().all(|h| h.resolved_at < current.as_of));
        assert!(current.matches().all(|m| m.played_at < current.as_of));
    }

    #[test]
    fn same_seed_same_league() {
        let mut league = SyntheticLeague::default();
        league.upset_rate = 0.2;
        let a = league.catalog().to_json_string().expect("json");
        let b = league.catalog().to_json_string().expect("json");
        assert_eq!(a, b);
    }
}
