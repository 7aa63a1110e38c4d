//! Event taxonomy, zone normalization, and timecode helpers.
//!
//! The taxonomy maps user-facing event terms to the backend action names
//! that appear in the per-game timeline exports. Unknown terms pass
//! through uppercased so literal action names keep working.

/// Expand an event term to backend action names.
pub fn expand_event_term(term: &str) -> Vec<String> {
    let actions: &[&str] = match term.to_lowercase().as_str() {
        "zone_entry" => &[
            "CONTROLLED ENTRY INTO OZ",
            "OZ ENTRY PASS+",
            "O-ZONE ENTRY PASS RECEPTION",
        ],
        "dump_in" => &["DUMP IN+", "CHIP DUMP+"],
        "dzone_exit" | "zone_exit" => &["CONTROLLED EXIT FROM DZ"],
        "breakout" => &["CONTROLLED EXIT FROM DZ", "DZ OUTLET PASS+"],
        "shot" => &[
            "SLOT SHOT FOR ONNET",
            "OUTSIDE SHOT FOR ONNET",
            "SLOT SHOT FOR MISSED",
            "OUTSIDE SHOT FOR MISSED",
            "SLOT SHOT FOR BLOCKED",
        ],
        "goal" => &["GOAL"],
        "pass" => &["OZPASS", "NZPASS", "DZONE D2D+", "DZ OUTLET PASS+"],
        "block" => &["BLOCK OPPOSITION SHOT+", "BLOCK OPPOSITION PASS+"],
        "stick_check" => &["OZ STICK CHK+", "DZ STICK CHK+"],
        "pressure" => &["SHOT PRESSURE"],
        "lpr" => &["LPR+", "DUMP IN LPR+", "OFF LPR"],
        "recovery" => &["LPR+", "DUMP IN LPR+"],
        "turnover" => &["PUCK GIVEAWAY"],
        "takeaway" => &["TAKEAWAY"],
        "faceoff" => &["FACEOFF WIN+", "FACEOFF LOSS"],
        _ => return vec![term.to_uppercase()],
    };
    actions.iter().map(|s| s.to_string()).collect()
}

/// Normalize a zone spelling to OZ/NZ/DZ.
///
/// Accepts the export's handful of synonyms; anything else comes back
/// uppercased unchanged.
pub fn normalize_zone(zone: &str) -> String {
    let upper = zone.trim().to_uppercase();
    match upper.as_str() {
        "OFFENSIVE" | "O-ZONE" | "OZONE" | "OFFENSIVE ZONE" => "OZ".to_string(),
        "NEUTRAL" | "NEUTRAL ZONE" | "N-ZONE" | "NZONE" => "NZ".to_string(),
        "DEFENSIVE" | "D-ZONE" | "DZONE" | "DEFENSIVE ZONE" => "DZ".to_string(),
        _ => upper,
    }
}

/// Frames per second assumed for the FF field of broadcast timecodes.
const TIMECODE_FPS: f64 = 30.0;

/// Parse `HH:MM:SS:FF` (or `HH:MM:SS`) to seconds. Malformed input maps
/// to 0.0, matching the analytics exports' tolerance.
pub fn parse_timecode_to_seconds(timecode: &str) -> f64 {
    let parts: Vec<&str> = timecode.trim().split(':').collect();
    match parts.as_slice() {
        [h, m, s, ff] => {
            let (Ok(h), Ok(m), Ok(s), Ok(ff)) = (
                h.parse::<f64>(),
                m.parse::<f64>(),
                s.parse::<f64>(),
                ff.parse::<f64>(),
            ) else {
                return 0.0;
            };
            h * 3600.0 + m * 60.0 + s + ff / TIMECODE_FPS
        }
        [h, m, s] => {
            let (Ok(h), Ok(m), Ok(s)) = (h.parse::<f64>(), m.parse::<f64>(), s.parse::<f64>())
            else {
                return 0.0;
            };
            h * 3600.0 + m * 60.0 + s
        }
        _ => 0.0,
    }
}

/// Format seconds as `HH:MM:SS:FF`.
pub fn seconds_to_timecode(seconds: f64) -> String {
    let h = (seconds / 3600.0) as u32;
    let m = ((seconds % 3600.0) / 60.0) as u32;
    let s = (seconds % 60.0) as u32;
    let ff = ((seconds - seconds.floor()) * TIMECODE_FPS) as u32;
    format!("{h:02}:{m:02}:{s:02}:{ff:02}")
}

/// Format period-relative seconds as a `MM:SS` clock position.
pub fn seconds_to_period_time(seconds: f64) -> String {
    let minutes = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{minutes}:{secs:02}")
}
