//! Clip pipeline types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extraction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipMode {
    /// Windows around individual timeline events.
    Event,
    /// Whole shifts (continuous ice time).
    Shift,
}

impl ClipMode {
    /// Parse mode from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "event" => Some(Self::Event),
            "shift" => Some(Self::Shift),
            _ => None,
        }
    }
}

impl Default for ClipMode {
    fn default() -> Self {
        Self::Event
    }
}

impl fmt::Display for ClipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Shift => write!(f, "shift"),
        }
    }
}

/// Timeframe token resolved through the schedule lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    /// Most recent final game.
    LastGame,
    /// Last three final games.
    Last3Games,
    /// Last five final games.
    Last5Games,
    /// Last ten final games.
    Last10Games,
    /// Every final game this season.
    ThisSeason,
}

impl Timeframe {
    /// Parse a timeframe token.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "last_game" => Some(Self::LastGame),
            "last_3_games" => Some(Self::Last3Games),
            "last_5_games" => Some(Self::Last5Games),
            "last_10_games" => Some(Self::Last10Games),
            "this_season" => Some(Self::ThisSeason),
            _ => None,
        }
    }

    /// Number of games the token asks for; `None` means all.
    pub fn game_count(&self) -> Option<usize> {
        match self {
            Self::LastGame => Some(1),
            Self::Last3Games => Some(3),
            Self::Last5Games => Some(5),
            Self::Last10Games => Some(10),
            Self::ThisSeason => None,
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::LastGame
    }
}

/// A player reference: numeric id or a name to resolve via the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerRef {
    /// Numeric NHL player id.
    Id(i64),
    /// Player name (resolved best-effort).
    Name(String),
}

impl From<i64> for PlayerRef {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for PlayerRef {
    fn from(s: &str) -> Self {
        match s.trim().parse::<i64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Name(s.to_string()),
        }
    }
}

/// Clip window around a timeline event, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    /// Seconds before the event timecode.
    pub pre_s: f64,
    /// Seconds after the event timecode.
    pub post_s: f64,
}

impl Default for ClipWindow {
    fn default() -> Self {
        Self {
            pre_s: 3.0,
            post_s: 5.0,
        }
    }
}

/// Search parameters for the clip extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClipSearchParams {
    /// Actor players (ids or names).
    pub players: Vec<PlayerRef>,
    /// Teammates that must be on the ice (shift mode).
    pub teammates: Vec<PlayerRef>,
    /// Specific opponents that must be on the ice (shift mode).
    pub opponents_on_ice: Vec<PlayerRef>,
    /// Event taxonomy terms or literal action names.
    pub event_types: Vec<String>,
    /// Zone filters (OZ/NZ/DZ, synonyms accepted).
    pub zones: Option<Vec<String>>,
    /// Timeframe token when no explicit game ids are given.
    pub timeframe: Option<Timeframe>,
    /// Explicit game identifiers.
    pub game_ids: Option<Vec<String>>,
    /// Periods subset (1..3+).
    pub periods: Option<Vec<u32>>,
    /// Team code for timeframe resolution and video lookup.
    pub team: Option<String>,
    /// Extraction mode.
    pub mode: ClipMode,
    /// Maximum segments returned.
    pub limit: usize,
    /// Event clip window.
    pub clip_window: ClipWindow,
    /// Season string (e.g., "20252026").
    pub season: String,
}

impl ClipSearchParams {
    /// Parameters with production defaults.
    pub fn new() -> Self {
        Self {
            limit: 10,
            season: "20252026".to_string(),
            ..Default::default()
        }
    }
}

/// An on-ice player enriched with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnIcePlayer {
    /// Player id.
    pub id: String,
    /// Display name; falls back to the stringified id.
    pub name: String,
}

/// A time-bounded descriptor into a source video, produced by the
/// extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipSegment {
    /// Stable clip identifier.
    pub clip_id: String,
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
    /// Actor player id (normalized).
    pub player_id: String,
    /// Actor player name.
    pub player_name: Option<String>,
    /// Teammates on ice.
    pub teammates_on_ice: Vec<OnIcePlayer>,
    /// Opponents on ice.
    pub opponents_on_ice: Vec<OnIcePlayer>,
    /// Team name.
    pub team: String,
    /// Team code.
    pub team_code: String,
    /// Opponent team code or name.
    pub opponent: String,
    /// Game identifier.
    pub game_id: String,
    /// Game date (YYYY-MM-DD or "unknown").
    pub game_date: String,
    /// Season string.
    pub season: String,
    /// Period number.
    pub period: u32,
    /// Period clock position (MM:SS).
    pub period_time: String,
    /// Broadcast timecode (HH:MM:SS:FF).
    pub timecode: String,
    /// Event timecode in period-relative seconds.
    pub timecode_seconds: f64,
    /// Segment start in period-relative seconds.
    pub start_timecode_s: f64,
    /// Segment end in period-relative seconds.
    pub end_timecode_s: f64,
    /// Segment duration in seconds.
    pub duration_s: f64,
    /// Extraction mode.
    pub mode: ClipMode,
    /// Event action name (event mode).
    pub event_type: Option<String>,
    /// Event outcome (event mode).
    pub outcome: Option<String>,
    /// Event zone (event mode).
    pub zone: Option<String>,
    /// Strength state (e.g., "5v5").
    pub strength: Option<String>,
    /// Resolved period video path, when found.
    pub period_video_path: Option<PathBuf>,
    /// Where this segment came from (source table name).
    pub provenance: String,
}

/// Request to cut a clip from a source video.
#[derive(Debug, Clone)]
pub struct ClipCutRequest {
    /// Source period video.
    pub source_video: PathBuf,
    /// Start seconds within the source.
    pub start_seconds: f64,
    /// End seconds within the source.
    pub end_seconds: f64,
    /// Output MP4 path.
    pub output_path: PathBuf,
    /// Clip identifier.
    pub clip_id: String,
    /// Contextual metadata persisted with the clip.
    pub metadata: ClipJobMetadata,
}

impl ClipCutRequest {
    /// Requested duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Validate shape: source exists, start >= 0, end > start, duration
    /// within the hard cap.
    pub fn validate(&self) -> Result<(), String> {
        if !self.source_video.exists() {
            return Err(format!(
                "Source video not found: {}",
                self.source_video.display()
            ));
        }
        if self.start_seconds < 0.0 {
            return Err("Start must be non-negative".to_string());
        }
        if self.end_seconds <= self.start_seconds {
            return Err("End must be after start".to_string());
        }
        if self.duration() > 300.0 {
            return Err("Clip duration exceeds the 300s hard cap".to_string());
        }
        Ok(())
    }
}

/// Contextual metadata carried with a cut request into the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClipJobMetadata {
    /// Extraction mode; shift requests prefer the stream-copy path.
    pub mode: Option<ClipMode>,
    /// Game identifier.
    pub game_id: Option<String>,
    /// Season string.
    pub season: Option<String>,
    /// Period number.
    pub period: Option<u32>,
    /// Actor player id.
    pub player_id: Option<String>,
    /// Actor player name.
    pub player_name: Option<String>,
    /// Team code.
    pub team_code: Option<String>,
    /// Opponent code.
    pub opponent_code: Option<String>,
    /// Event action name.
    pub event_type: Option<String>,
    /// Event outcome.
    pub outcome: Option<String>,
    /// Event zone.
    pub zone: Option<String>,
    /// Anything else worth persisting (HLS playlist path lands here).
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ClipJobMetadata {
    /// Build job metadata from an extracted segment.
    pub fn from_segment(segment: &ClipSegment) -> Self {
        Self {
            mode: Some(segment.mode),
            game_id: Some(segment.game_id.clone()),
            season: Some(segment.season.clone()),
            period: Some(segment.period),
            player_id: Some(segment.player_id.clone()),
            player_name: segment.player_name.clone(),
            team_code: Some(segment.team_code.clone()),
            opponent_code: Some(segment.opponent.clone()),
            event_type: segment.event_type.clone(),
            outcome: segment.outcome.clone(),
            zone: segment.zone.clone(),
            extra: BTreeMap::new(),
        }
    }
}

/// Result of a clip cutting operation.
#[derive(Debug, Clone)]
pub struct ClipCutResult {
    /// Whether the clip was produced (or found in cache).
    pub success: bool,
    /// Clip identifier from the request.
    pub clip_id: String,
    /// Output file path on success.
    pub output_path: Option<PathBuf>,
    /// Thumbnail path on success.
    pub thumbnail_path: Option<PathBuf>,
    /// HLS playlist path when packaging ran.
    pub hls_playlist_path: Option<PathBuf>,
    /// Clip duration in seconds.
    pub duration_s: Option<f64>,
    /// Output file size in bytes.
    pub file_size_bytes: Option<u64>,
    /// Wall-clock processing time in seconds.
    pub processing_time_s: f64,
    /// Whether the result came from the index cache.
    pub cache_hit: bool,
    /// Failure message when `success` is false.
    pub error_message: Option<String>,
}

impl ClipCutResult {
    /// A failure result.
    pub fn failure(clip_id: &str, processing_time_s: f64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            clip_id: clip_id.to_string(),
            output_path: None,
            thumbnail_path: None,
            hls_playlist_path: None,
            duration_s: None,
            file_size_bytes: None,
            processing_time_s,
            cache_hit: false,
            error_message: Some(message.into()),
        }
    }
}

/// Persisted outcome of cutting a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    /// Clip identifier (index primary key).
    pub clip_id: String,
    /// Deduplication fingerprint of (source, start, end).
    pub clip_hash: String,
    /// Output MP4 path.
    pub output_path: String,
    /// Thumbnail path.
    pub thumbnail_path: String,
    /// Source video path.
    pub source_video: String,
    /// Clamped start within the source, seconds.
    pub start_timecode_s: f64,
    /// Clamped end within the source, seconds.
    pub end_timecode_s: f64,
    /// Duration in seconds.
    pub duration_s: f64,
    /// Game identifier.
    pub game_id: String,
    /// Game date (YYYYMMDD).
    pub game_date: String,
    /// Season string.
    pub season: String,
    /// Period number.
    pub period: u32,
    /// Actor player id.
    pub player_id: String,
    /// Actor player name.
    pub player_name: Option<String>,
    /// Team code.
    pub team_code: String,
    /// Opponent code.
    pub opponent_code: String,
    /// Event action name.
    pub event_type: String,
    /// Event outcome.
    pub outcome: Option<String>,
    /// Event zone.
    pub zone: Option<String>,
    /// Output file size in bytes.
    pub file_size_bytes: u64,
    /// Processing time in seconds.
    pub processing_time_s: f64,
    /// Whether this row was produced by a cache hit.
    pub cache_hit: bool,
    /// Extra metadata as a JSON string.
    pub extra_metadata: Option<String>,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
    /// Last update instant; bumped on upsert.
    pub updated_at: DateTime<Utc>,
}

/// Deterministic fingerprint for clip deduplication.
///
/// Identical (source basename, start, end) triples always produce the
/// same 12-hex-character value; the timestamps are formatted to two
/// decimals so float noise cannot split the cache.
pub fn clip_fingerprint(source_video: &Path, start_s: f64, end_s: f64) -> String {
    let basename = source_video
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let key = format!("{basename}:{start_s:.2}:{end_s:.2}");
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Strip quotes, whitespace, and a trailing `.0` from an identifier.
///
/// Analytics exports produce both `"8478463"` and `8478463.0` shapes for
/// the same player; both normalize to `8478463`.
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}
