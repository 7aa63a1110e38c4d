//! Roster and schedule collaborators.
//!
//! External lookup services appear to the extractor only by their shape;
//! the static implementations back tests and offline runs.

use std::collections::BTreeMap;

use super::types::Timeframe;

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterPlayer {
    /// NHL player id.
    pub id: i64,
    /// Full display name.
    pub name: String,
    /// Team code.
    pub team_code: String,
}

/// Player-name lookups.
pub trait RosterLookup: Send + Sync {
    /// Display name for a player id; best-effort.
    fn player_name(&self, player_id: i64, team_code: Option<&str>, season: &str)
        -> Option<String>;

    /// Players whose name matches (case-insensitive substring).
    fn search_by_name(
        &self,
        name: &str,
        team_code: Option<&str>,
        season: &str,
    ) -> Vec<RosterPlayer>;
}

/// Schedule lookups.
pub trait ScheduleLookup: Send + Sync {
    /// Game ids for a timeframe token, newest first.
    fn resolve_timeframe(&self, timeframe: &Timeframe, team_code: &str, season: &str)
        -> Vec<String>;

    /// Game date (YYYY-MM-DD) for a game id.
    fn game_date(&self, game_id: &str, team_code: &str, season: &str) -> Option<String>;
}

/// Static in-memory roster.
#[derive(Debug, Default)]
pub struct StaticRoster {
    players: BTreeMap<i64, RosterPlayer>,
}

impl StaticRoster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player.
    pub fn add(&mut self, id: i64, name: impl Into<String>, team_code: impl Into<String>) {
        self.players.insert(
            id,
            RosterPlayer {
                id,
                name: name.into(),
                team_code: team_code.into(),
            },
        );
    }
}

impl RosterLookup for StaticRoster {
    fn player_name(
        &self,
        player_id: i64,
        _team_code: Option<&str>,
        _season: &str,
    ) -> Option<String> {
        self.players.get(&player_id).map(|p| p.name.clone())
    }

    fn search_by_name(
        &self,
        name: &str,
        team_code: Option<&str>,
        _season: &str,
    ) -> Vec<RosterPlayer> {
        let needle = name.to_lowercase();
        self.players
            .values()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .filter(|p| team_code.map(|t| p.team_code == t).unwrap_or(true))
            .cloned()
            .collect()
    }
}

/// Static in-memory schedule: team code -> ordered final game ids
/// (newest first).
#[derive(Debug, Default)]
pub struct StaticSchedule {
    games: BTreeMap<String, Vec<String>>,
    dates: BTreeMap<String, String>,
}

impl StaticSchedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a final game for a team, newest first.
    pub fn add_game(&mut self, team_code: &str, game_id: &str, date: &str) {
        self.games
            .entry(team_code.to_string())
            .or_default()
            .push(game_id.to_string());
        self.dates.insert(game_id.to_string(), date.to_string());
    }
}

impl ScheduleLookup for StaticSchedule {
    fn resolve_timeframe(
        &self,
        timeframe: &Timeframe,
        team_code: &str,
        _season: &str,
    ) -> Vec<String> {
        let Some(games) = self.games.get(team_code) else {
            return Vec::new();
        };
        match timeframe.game_count() {
            Some(n) => games.iter().take(n).cloned().collect(),
            None => games.clone(),
        }
    }

    fn game_date(&self, game_id: &str, _team_code: &str, _season: &str) -> Option<String> {
        self.dates.get(game_id).cloned()
    }
}
