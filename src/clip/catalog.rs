//! Filesystem catalog of per-game analytics exports and period videos.
//!
//! Layout:
//! - metrics: `<metrics_dir>/*<game_id>*player_tendencies_timeline*.csv`
//!   and `<metrics_dir>/*<game_id>*comprehensive_metrics*.json`
//! - videos: `<clips_dir>/<season>/team/<team_code>/p<period>-…-<game_id>…`
//!   with `.mp4`, `.MOV`, and `.mov` accepted, probing both `2025-2026`
//!   and `20252026` season directory spellings.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::taxonomy::parse_timecode_to_seconds;
use crate::error::CoreError;

/// One row of the per-game timeline export.
#[derive(Debug, Clone)]
pub struct TimelineRow {
    /// Period number.
    pub period: u32,
    /// Broadcast timecode (HH:MM:SS:FF).
    pub timecode: String,
    /// Raw player id as exported (may carry a `.0` suffix).
    pub player_id: String,
    /// Action name.
    pub action: String,
    /// Zone, when tagged.
    pub zone: Option<String>,
    /// Outcome, when tagged.
    pub outcome: Option<String>,
    /// Team name.
    pub team: Option<String>,
    /// Team code.
    pub team_code: Option<String>,
    /// Opponent name or code.
    pub opponent: Option<String>,
    /// Period clock position as exported.
    pub period_time: Option<String>,
}

/// One shift of one player, from the comprehensive metrics export.
#[derive(Debug, Clone, Deserialize)]
pub struct ShiftRow {
    /// Player id.
    #[serde(default)]
    pub player_id: String,
    /// Period in which the shift starts.
    #[serde(default = "default_period")]
    pub start_period: u32,
    /// Absolute (whole-game) start seconds.
    #[serde(default)]
    pub start_timecode_abs: Option<f64>,
    /// Absolute (whole-game) end seconds.
    #[serde(default)]
    pub end_timecode_abs: Option<f64>,
    /// Real-time shift length, seconds.
    #[serde(default)]
    pub shift_real_length: Option<f64>,
    /// Game-clock shift length, seconds.
    #[serde(default)]
    pub shift_game_length: Option<f64>,
    /// Opponent ids seen on ice during the shift.
    #[serde(default)]
    pub opponents_seen_ids: Vec<serde_json::Value>,
    /// Teammate ids on ice during the shift.
    #[serde(default)]
    pub teammates_on_ice_ids: Vec<serde_json::Value>,
    /// Team name.
    #[serde(default)]
    pub team: String,
    /// Team code.
    #[serde(default)]
    pub team_code: String,
    /// "home" or "away".
    #[serde(default)]
    pub team_side: String,
    /// Strength state at shift start (e.g., "5v5").
    #[serde(default)]
    pub strength_start: Option<String>,
    /// Ordinal of the shift within the game.
    #[serde(default)]
    pub shift_number: u32,
}

fn default_period() -> u32 {
    1
}

/// Game header of the comprehensive metrics export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameInfo {
    /// Home team name.
    #[serde(default)]
    pub home_team: String,
    /// Away team name.
    #[serde(default)]
    pub away_team: String,
}

#[derive(Debug, Deserialize)]
struct ComprehensiveMetrics {
    #[serde(default)]
    game_info: GameInfo,
    #[serde(default)]
    player_shifts: PlayerShifts,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerShifts {
    #[serde(default)]
    shifts: Vec<ShiftRow>,
}

/// Locates and parses per-game analytics files and period videos.
#[derive(Debug, Clone)]
pub struct MetricsCatalog {
    metrics_dir: PathBuf,
    clips_dir: PathBuf,
}

impl MetricsCatalog {
    /// Create a catalog over the given roots.
    pub fn new(metrics_dir: impl Into<PathBuf>, clips_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.into(),
            clips_dir: clips_dir.into(),
        }
    }

    /// Find a metrics file whose name carries both the game id and kind.
    pub fn find_metrics_file(&self, game_id: &str, file_kind: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.metrics_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(game_id) && name.contains(file_kind) {
                return Some(entry.path());
            }
        }
        None
    }

    /// Timeline rows for a game; empty when no export exists.
    pub fn timeline_rows(&self, game_id: &str) -> Result<Vec<TimelineRow>, CoreError> {
        let Some(path) = self.find_metrics_file(game_id, "player_tendencies_timeline") else {
            tracing::warn!(game_id, "No timeline export found");
            return Ok(Vec::new());
        };
        read_timeline_csv(&path)
    }

    /// Shift rows and game header for a game, when the export exists.
    pub fn shift_data(&self, game_id: &str) -> Result<Option<(Vec<ShiftRow>, GameInfo)>, CoreError> {
        let Some(path) = self.find_metrics_file(game_id, "comprehensive_metrics") else {
            tracing::warn!(game_id, "No comprehensive metrics export found");
            return Ok(None);
        };
        let text = std::fs::read_to_string(&path).map_err(|e| {
            CoreError::Backend(format!("Cannot read metrics file {}: {e}", path.display()))
        })?;
        let metrics: ComprehensiveMetrics = serde_json::from_str(&text).map_err(|e| {
            CoreError::Backend(format!("Malformed metrics file {}: {e}", path.display()))
        })?;
        Ok(Some((metrics.player_shifts.shifts, metrics.game_info)))
    }

    /// Per-period offsets in real-time seconds.
    ///
    /// `offset[p]` is the sum of the maximum timecodes of periods `1..p`,
    /// which maps absolute timecodes back into period-relative seconds.
    pub fn period_offsets(&self, game_id: &str) -> std::collections::BTreeMap<u32, f64> {
        let mut offsets = std::collections::BTreeMap::new();
        let Ok(rows) = self.timeline_rows(game_id) else {
            return offsets;
        };

        let mut max_per_period: std::collections::BTreeMap<u32, f64> = Default::default();
        for row in &rows {
            let seconds = parse_timecode_to_seconds(&row.timecode);
            let entry = max_per_period.entry(row.period).or_insert(0.0);
            if seconds > *entry {
                *entry = seconds;
            }
        }

        let mut acc = 0.0;
        for (period, max_s) in max_per_period {
            offsets.insert(period, acc);
            acc += max_s;
        }
        offsets
    }

    /// Broadcast duration of a period (maximum timecode), when known.
    pub fn period_duration(&self, game_id: &str, period: u32) -> Option<f64> {
        let rows = self.timeline_rows(game_id).ok()?;
        rows.iter()
            .filter(|r| r.period == period)
            .map(|r| parse_timecode_to_seconds(&r.timecode))
            .fold(None, |acc, s| Some(acc.map_or(s, |a: f64| a.max(s))))
    }

    /// Resolve the period video file for a game.
    pub fn resolve_period_video(
        &self,
        game_id: &str,
        period: u32,
        team_code: Option<&str>,
        season: &str,
    ) -> Option<PathBuf> {
        let team_code = team_code?;
        let season_dirs = [format_season(season), season.to_string()];
        let prefix = format!("p{period}-");

        for season_dir in &season_dirs {
            let dir = self
                .clips_dir
                .join(season_dir)
                .join("team")
                .join(team_code);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let extension_ok = name.ends_with(".mp4")
                    || name.ends_with(".MOV")
                    || name.ends_with(".mov");
                if extension_ok && name.starts_with(&prefix) && name.contains(game_id) {
                    return Some(entry.path());
                }
            }
        }
        None
    }

    /// Newest metrics game id for a team, by file modification time.
    ///
    /// Fallback for timeframe resolution when the schedule has no final
    /// games yet.
    pub fn latest_game_for_team(&self, team_code: &str, season: &str) -> Option<String> {
        let entries = std::fs::read_dir(&self.metrics_dir).ok()?;
        let mut candidates: Vec<(std::time::SystemTime, String)> = Vec::new();

        let vs_pattern = format!("NHL-{team_code}vs");
        let reverse_pattern = format!("vs{team_code}-");

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.contains(season) {
                continue;
            }
            if !(name.contains(&vs_pattern) || name.contains(&reverse_pattern)) {
                continue;
            }
            if let Some(game_id) = extract_game_id(&name) {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                candidates.push((modified, game_id));
            }
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().next().map(|(_, id)| id)
    }
}

/// Extract the 5-digit game id from an export file name.
fn extract_game_id(name: &str) -> Option<String> {
    use std::sync::OnceLock;
    static GAME_ID: OnceLock<regex_lite::Regex> = OnceLock::new();
    let re = GAME_ID
        .get_or_init(|| regex_lite::Regex::new(r"-(\d{5})(?:[_\-.]|$)").expect("static pattern"));
    re.captures(name).map(|c| c[1].to_string())
}

/// Convert `20252026` to `2025-2026`; other shapes pass through.
fn format_season(season: &str) -> String {
    if season.len() == 8 && season.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}", &season[..4], &season[4..])
    } else {
        season.to_string()
    }
}

fn read_timeline_csv(path: &Path) -> Result<Vec<TimelineRow>, CoreError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        CoreError::Backend(format!("Cannot read timeline {}: {e}", path.display()))
    })?;

    let headers = reader
        .headers()
        .map_err(|e| CoreError::Backend(format!("Malformed timeline header: {e}")))?
        .clone();
    let idx = |name: &str| headers.iter().position(|h| h == name);

    let (Some(period_idx), Some(timecode_idx), Some(player_idx), Some(action_idx)) = (
        idx("period"),
        idx("timecode"),
        idx("player_id"),
        idx("action"),
    ) else {
        return Err(CoreError::Backend(format!(
            "Timeline {} is missing required columns",
            path.display()
        )));
    };

    let zone_idx = idx("zone");
    let outcome_idx = idx("outcome");
    let team_idx = idx("team");
    let team_code_idx = idx("team_code");
    let opponent_idx = idx("opponent");
    let period_time_idx = idx("period_time");

    let get = |record: &csv::StringRecord, i: Option<usize>| -> Option<String> {
        i.and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| CoreError::Backend(format!("Malformed timeline row: {e}")))?;

        let period = record
            .get(period_idx)
            .and_then(|p| p.trim().parse::<f64>().ok())
            .map(|p| p as u32)
            .unwrap_or(1);

        rows.push(TimelineRow {
            period,
            timecode: record.get(timecode_idx).unwrap_or("").trim().to_string(),
            player_id: record.get(player_idx).unwrap_or("").trim().to_string(),
            action: record.get(action_idx).unwrap_or("").trim().to_string(),
            zone: get(&record, zone_idx),
            outcome: get(&record, outcome_idx),
            team: get(&record, team_idx),
            team_code: get(&record, team_code_idx),
            opponent: get(&record, opponent_idx),
            period_time: get(&record, period_time_idx),
        });
    }
    Ok(rows)
}
