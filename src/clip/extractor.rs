//! Clip extractor.
//!
//! Derives time-bounded segments from the per-game analytics exports.
//! Event mode windows individual timeline rows; shift mode maps whole
//! shifts from absolute timecodes into period-relative seconds via a
//! write-once per-game period-offset cache.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::catalog::{GameInfo, MetricsCatalog, ShiftRow, TimelineRow};
use super::roster::{RosterLookup, ScheduleLookup};
use super::taxonomy::{
    expand_event_term, normalize_zone, parse_timecode_to_seconds, seconds_to_period_time,
    seconds_to_timecode,
};
use super::types::{
    normalize_id, ClipMode, ClipSearchParams, ClipSegment, OnIcePlayer, PlayerRef, Timeframe,
};
use crate::error::CoreError;

/// Fallback shift length when the export carries no usable bounds.
const DEFAULT_SHIFT_LENGTH_S: f64 = 12.0;

/// Extracts clip segments from analytics exports.
pub struct ClipExtractor {
    catalog: MetricsCatalog,
    roster: Arc<dyn RosterLookup>,
    schedule: Arc<dyn ScheduleLookup>,
    // Write-once per game; offsets never change once an export is final.
    period_offsets: RwLock<HashMap<String, BTreeMap<u32, f64>>>,
}

impl ClipExtractor {
    /// Create an extractor over the catalog and lookup collaborators.
    pub fn new(
        catalog: MetricsCatalog,
        roster: Arc<dyn RosterLookup>,
        schedule: Arc<dyn ScheduleLookup>,
    ) -> Self {
        Self {
            catalog,
            roster,
            schedule,
            period_offsets: RwLock::new(HashMap::new()),
        }
    }

    /// Execute a clip query.
    ///
    /// Segments come back ordered by (game, period, start time) and
    /// capped at `params.limit`.
    pub fn query(&self, params: &ClipSearchParams) -> Result<Vec<ClipSegment>, CoreError> {
        let mut segments = match params.mode {
            ClipMode::Shift => self.query_shifts(params)?,
            ClipMode::Event => self.query_events(params)?,
        };

        segments.sort_by(|a, b| {
            a.game_id
                .cmp(&b.game_id)
                .then(a.period.cmp(&b.period))
                .then(
                    a.start_timecode_s
                        .partial_cmp(&b.start_timecode_s)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        segments.truncate(params.limit.max(1));
        Ok(segments)
    }

    fn query_events(&self, params: &ClipSearchParams) -> Result<Vec<ClipSegment>, CoreError> {
        let player_ids = self.resolve_player_ids(&params.players, params.team.as_deref(), params);
        let game_ids = self.resolve_game_ids(params);

        let expanded_events: Vec<String> = params
            .event_types
            .iter()
            .flat_map(|term| expand_event_term(term))
            .collect();

        let zones_wanted: Option<Vec<String>> = params
            .zones
            .as_ref()
            .map(|zones| zones.iter().map(|z| normalize_zone(z)).collect());

        let mut segments = Vec::new();
        for game_id in &game_ids {
            let rows = self.catalog.timeline_rows(game_id)?;
            for row in &rows {
                if !player_matches(&row.player_id, &player_ids) {
                    continue;
                }
                if !expanded_events.is_empty() {
                    let action = row.action.to_uppercase();
                    if !expanded_events.iter().any(|a| action.contains(a)) {
                        continue;
                    }
                }
                if let Some(zones) = &zones_wanted {
                    let row_zone = row.zone.as_deref().map(normalize_zone).unwrap_or_default();
                    if !zones.contains(&row_zone) {
                        continue;
                    }
                }
                if let Some(periods) = &params.periods {
                    if !periods.contains(&row.period) {
                        continue;
                    }
                }
                segments.push(self.event_segment(row, game_id, params));
            }
        }
        Ok(segments)
    }

    fn query_shifts(&self, params: &ClipSearchParams) -> Result<Vec<ClipSegment>, CoreError> {
        let player_ids = self.resolve_player_ids(&params.players, params.team.as_deref(), params);
        let teammate_ids = self.resolve_player_ids(&params.teammates, params.team.as_deref(), params);
        let opponent_ids = self.resolve_player_ids(&params.opponents_on_ice, None, params);
        let game_ids = self.resolve_game_ids(params);

        let mut segments = Vec::new();
        for game_id in &game_ids {
            let Some((shifts, game_info)) = self.catalog.shift_data(game_id)? else {
                continue;
            };

            for player_id in &player_ids {
                let player_id = player_id.to_string();
                for shift in shifts.iter().filter(|s| normalize_id(&s.player_id) == player_id) {
                    if let Some(periods) = &params.periods {
                        if !periods.contains(&shift.start_period) {
                            continue;
                        }
                    }
                    if !opponent_ids.is_empty() && !ids_overlap(&shift.opponents_seen_ids, &opponent_ids) {
                        continue;
                    }
                    if !teammate_ids.is_empty() && !ids_overlap(&shift.teammates_on_ice_ids, &teammate_ids)
                    {
                        continue;
                    }
                    segments.push(self.shift_segment(shift, &player_id, game_id, &game_info, params));
                }
            }
        }
        Ok(segments)
    }

    fn event_segment(
        &self,
        row: &TimelineRow,
        game_id: &str,
        params: &ClipSearchParams,
    ) -> ClipSegment {
        let timecode_s = parse_timecode_to_seconds(&row.timecode);
        let start_s = (timecode_s - params.clip_window.pre_s).max(0.0);
        let end_s = timecode_s + params.clip_window.post_s;

        let player_id = normalize_id(&row.player_id);
        let player_name = player_id
            .parse::<i64>()
            .ok()
            .and_then(|id| {
                self.roster
                    .player_name(id, row.team_code.as_deref(), &params.season)
            });
        let display_name = player_name.clone().unwrap_or_else(|| player_id.clone());

        let team_code = row.team_code.clone().or_else(|| row.team.clone());
        let period_video = self.catalog.resolve_period_video(
            game_id,
            row.period,
            team_code.as_deref(),
            &params.season,
        );

        let clip_id = {
            let action_tag: String = row.action.chars().take(20).collect();
            format!(
                "clip_{game_id}_p{}_{}s_{player_id}_{action_tag}",
                row.period, timecode_s as i64
            )
            .replace(' ', "_")
            .replace('/', "_")
        };

        ClipSegment {
            clip_id,
            title: format!("{display_name} - {}", row.action),
            description: format!(
                "Period {} at {}",
                row.period,
                row.period_time.as_deref().unwrap_or("unknown")
            ),
            player_id,
            player_name,
            teammates_on_ice: Vec::new(),
            opponents_on_ice: Vec::new(),
            team: row.team.clone().unwrap_or_default(),
            team_code: team_code.unwrap_or_default(),
            opponent: row.opponent.clone().unwrap_or_default(),
            game_id: game_id.to_string(),
            game_date: self.game_date(game_id, row.team_code.as_deref(), params),
            season: params.season.clone(),
            period: row.period,
            period_time: row.period_time.clone().unwrap_or_default(),
            timecode: row.timecode.clone(),
            timecode_seconds: timecode_s,
            start_timecode_s: start_s,
            end_timecode_s: end_s,
            duration_s: end_s - start_s,
            mode: ClipMode::Event,
            event_type: Some(row.action.clone()),
            outcome: row.outcome.clone(),
            zone: row.zone.clone(),
            strength: None,
            period_video_path: period_video,
            provenance: "player_tendencies_timeline".to_string(),
        }
    }

    fn shift_segment(
        &self,
        shift: &ShiftRow,
        player_id: &str,
        game_id: &str,
        game_info: &GameInfo,
        params: &ClipSearchParams,
    ) -> ClipSegment {
        let period = shift.start_period;
        let offsets = self.offsets_for(game_id);
        let period_offset = offsets.get(&period).copied().unwrap_or(0.0);

        let mut start_s = shift
            .start_timecode_abs
            .map(|abs| abs - period_offset)
            .unwrap_or(0.0);
        let mut end_s = match shift.end_timecode_abs {
            Some(abs) => abs - period_offset,
            None => {
                let approx = shift
                    .shift_real_length
                    .or(shift.shift_game_length)
                    .unwrap_or(DEFAULT_SHIFT_LENGTH_S);
                start_s + approx
            }
        };

        if let Some(period_duration) = self.catalog.period_duration(game_id, period) {
            start_s = start_s.clamp(0.0, period_duration);
            end_s = end_s.min(period_duration);
        } else {
            start_s = start_s.max(0.0);
        }
        end_s = end_s.max(start_s + 0.1);
        let duration = end_s - start_s;

        let player_name = player_id.parse::<i64>().ok().and_then(|id| {
            self.roster
                .player_name(id, Some(shift.team_code.as_str()), &params.season)
        });
        let display_name = player_name.clone().unwrap_or_else(|| player_id.to_string());

        let opponents_on_ice = shift
            .opponents_seen_ids
            .iter()
            .map(|raw| {
                let id = normalize_id(&json_id_to_string(raw));
                let name = id
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| self.roster.player_name(n, None, &params.season))
                    .unwrap_or_else(|| id.clone());
                OnIcePlayer { id, name }
            })
            .collect();

        let teammates_on_ice = shift
            .teammates_on_ice_ids
            .iter()
            .map(|raw| {
                let id = normalize_id(&json_id_to_string(raw));
                let name = id
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| {
                        self.roster
                            .player_name(n, Some(shift.team_code.as_str()), &params.season)
                    })
                    .unwrap_or_else(|| id.clone());
                OnIcePlayer { id, name }
            })
            .collect();

        let opponent = if shift.team_side == "home" {
            game_info.away_team.clone()
        } else {
            game_info.home_team.clone()
        };

        let period_video = self.catalog.resolve_period_video(
            game_id,
            period,
            Some(shift.team_code.as_str()),
            &params.season,
        );

        ClipSegment {
            clip_id: format!("shift_{game_id}_p{period}_{}s_{player_id}", start_s as i64),
            title: format!("{display_name} - Shift in Period {period}"),
            description: format!(
                "{duration:.1}s shift, {} strength",
                shift.strength_start.as_deref().unwrap_or("unknown")
            ),
            player_id: player_id.to_string(),
            player_name,
            teammates_on_ice,
            opponents_on_ice,
            team: shift.team.clone(),
            team_code: shift.team_code.clone(),
            opponent,
            game_id: game_id.to_string(),
            game_date: self.game_date(game_id, Some(shift.team_code.as_str()), params),
            season: params.season.clone(),
            period,
            period_time: seconds_to_period_time(start_s),
            timecode: seconds_to_timecode(start_s),
            timecode_seconds: start_s,
            start_timecode_s: start_s,
            end_timecode_s: end_s,
            duration_s: duration,
            mode: ClipMode::Shift,
            event_type: None,
            outcome: None,
            zone: None,
            strength: shift.strength_start.clone(),
            period_video_path: period_video,
            provenance: "player_shifts".to_string(),
        }
    }

    /// Resolve player references to normalized numeric ids.
    fn resolve_player_ids(
        &self,
        players: &[PlayerRef],
        team_code: Option<&str>,
        params: &ClipSearchParams,
    ) -> Vec<i64> {
        let mut ids = Vec::new();
        for player in players {
            match player {
                PlayerRef::Id(id) => ids.push(*id),
                PlayerRef::Name(name) => {
                    let matches = self.roster.search_by_name(name, team_code, &params.season);
                    if matches.is_empty() {
                        tracing::warn!(name = %name, "No roster match for player name");
                    }
                    ids.extend(matches.into_iter().map(|m| m.id));
                }
            }
        }
        ids
    }

    /// Resolve explicit game ids, a timeframe, or fall back to the newest
    /// metrics export for the team.
    fn resolve_game_ids(&self, params: &ClipSearchParams) -> Vec<String> {
        if let Some(game_ids) = &params.game_ids {
            return game_ids.clone();
        }
        let Some(team) = &params.team else {
            return Vec::new();
        };

        let timeframe = params.timeframe.clone().unwrap_or(Timeframe::LastGame);
        let ids = self
            .schedule
            .resolve_timeframe(&timeframe, team, &params.season);
        if !ids.is_empty() {
            return ids;
        }

        match self.catalog.latest_game_for_team(team, &params.season) {
            Some(id) => vec![id],
            None => Vec::new(),
        }
    }

    fn offsets_for(&self, game_id: &str) -> BTreeMap<u32, f64> {
        if let Some(offsets) = self.period_offsets.read().get(game_id) {
            return offsets.clone();
        }
        let offsets = self.catalog.period_offsets(game_id);
        self.period_offsets
            .write()
            .entry(game_id.to_string())
            .or_insert_with(|| offsets.clone());
        offsets
    }

    fn game_date(
        &self,
        game_id: &str,
        team_code: Option<&str>,
        params: &ClipSearchParams,
    ) -> String {
        team_code
            .and_then(|team| self.schedule.game_date(game_id, team, &params.season))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn player_matches(raw_player_id: &str, wanted: &[i64]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    let normalized = normalize_id(raw_player_id);
    wanted.iter().any(|id| id.to_string() == normalized)
}

fn ids_overlap(raw_ids: &[serde_json::Value], wanted: &[i64]) -> bool {
    raw_ids.iter().any(|raw| {
        let id = normalize_id(&json_id_to_string(raw));
        wanted.iter().any(|w| w.to_string() == id)
    })
}

fn json_id_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
