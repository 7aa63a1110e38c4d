//! Embedded clip index.
//!
//! Thread-safe clip metadata storage with analytics-friendly indexes.
//! Writes are serialised through a process-wide mutex with a short retry
//! loop for transient conflicts; readers open independent connections and
//! run concurrently.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use polars::prelude::*;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::types::ClipRecord;
use crate::error::CoreError;

/// SQL schema for the clips table and its indexes.
pub const CLIPS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clips (
    clip_id TEXT PRIMARY KEY,
    clip_hash TEXT UNIQUE NOT NULL,

    output_path TEXT NOT NULL,
    thumbnail_path TEXT NOT NULL,

    source_video TEXT NOT NULL,
    start_timecode_s REAL NOT NULL,
    end_timecode_s REAL NOT NULL,
    duration_s REAL NOT NULL,

    game_id TEXT NOT NULL,
    game_date TEXT NOT NULL,
    season TEXT NOT NULL,
    period INTEGER NOT NULL,

    player_id TEXT NOT NULL,
    player_name TEXT,
    team_code TEXT NOT NULL,
    opponent_code TEXT NOT NULL,
    event_type TEXT NOT NULL,
    outcome TEXT,
    zone TEXT,

    file_size_bytes INTEGER NOT NULL,
    processing_time_s REAL,
    cache_hit INTEGER NOT NULL DEFAULT 0,
    extra_metadata TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_clips_player ON clips(player_id);
CREATE INDEX IF NOT EXISTS idx_clips_game ON clips(game_id);
CREATE INDEX IF NOT EXISTS idx_clips_event ON clips(event_type);
CREATE INDEX IF NOT EXISTS idx_clips_date ON clips(game_date);
CREATE INDEX IF NOT EXISTS idx_clips_hash ON clips(clip_hash);
CREATE INDEX IF NOT EXISTS idx_clips_team ON clips(team_code);
CREATE INDEX IF NOT EXISTS idx_clips_period ON clips(game_id, period);
"#;

const INSERT_SQL: &str = r#"
INSERT INTO clips (
    clip_id, clip_hash, output_path, thumbnail_path,
    source_video, start_timecode_s, end_timecode_s, duration_s,
    game_id, game_date, season, period,
    player_id, player_name, team_code, opponent_code,
    event_type, outcome, zone,
    file_size_bytes, processing_time_s, cache_hit, extra_metadata,
    created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
ON CONFLICT (clip_id) DO UPDATE SET updated_at = excluded.updated_at
"#;

const SELECT_COLUMNS: &str = "\
clip_id, clip_hash, output_path, thumbnail_path, source_video, \
start_timecode_s, end_timecode_s, duration_s, game_id, game_date, season, \
period, player_id, player_name, team_code, opponent_code, event_type, \
outcome, zone, file_size_bytes, processing_time_s, cache_hit, \
extra_metadata, created_at, updated_at";

/// Write retry attempts for transient conflicts.
const WRITE_ATTEMPTS: u32 = 3;

/// Query filters for [`ClipIndex::query_clips`]; all filters conjoin.
#[derive(Debug, Clone, Default)]
pub struct ClipQueryFilter {
    /// Player ids.
    pub player_ids: Option<Vec<String>>,
    /// Game ids.
    pub game_ids: Option<Vec<String>>,
    /// Event action names.
    pub event_types: Option<Vec<String>>,
    /// Team codes.
    pub team_codes: Option<Vec<String>>,
}

/// Index statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClipIndexStats {
    /// Number of rows.
    pub total_clips: u64,
    /// Sum of output file sizes.
    pub total_size_bytes: u64,
    /// Same, in megabytes.
    pub total_size_mb: f64,
    /// Sum of clip durations in seconds.
    pub total_duration_s: f64,
    /// Same, in minutes.
    pub total_duration_min: f64,
    /// Distinct player ids.
    pub unique_players: u64,
    /// Distinct game ids.
    pub unique_games: u64,
    /// Rows flagged as cache hits.
    pub cache_hits: u64,
    /// Cache hits as a percentage of rows.
    pub cache_hit_rate: f64,
}

/// Embedded clip index keyed by clip id, with a unique secondary index on
/// fingerprint.
pub struct ClipIndex {
    db_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ClipIndex {
    /// Open (and self-initialise) the index at the given path.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::Backend(format!("Cannot create index directory: {e}"))
            })?;
        }

        let index = Self {
            db_path,
            write_lock: Mutex::new(()),
        };
        index.init_schema()?;
        tracing::info!(path = %index.db_path.display(), "Clip index initialized");
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        let conn = self.connect()?;
        conn.execute_batch(CLIPS_TABLE_SCHEMA)
            .map_err(|e| CoreError::Backend(format!("Schema init failed: {e}")))?;
        Ok(())
    }

    fn connect(&self) -> Result<Connection, CoreError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| CoreError::Backend(format!("Cannot open clip index: {e}")))?;
        // Writers and readers from multiple threads share this file.
        conn.busy_timeout(std::time::Duration::from_millis(250))
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        Ok(conn)
    }

    /// Insert a clip record; idempotent by clip id (upsert bumps
    /// `updated_at`). Retries transient conflicts.
    pub fn insert_clip(&self, record: &ClipRecord) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock();
        self.with_write_retry(|conn| execute_insert(conn, record, Utc::now()))
    }

    /// Insert many records under a single lock acquisition.
    pub fn batch_insert_clips(&self, records: &[ClipRecord]) -> Result<(), CoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        self.with_write_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now();
            for record in records {
                execute_insert(&tx, record, now)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn with_write_retry<F>(&self, mut op: F) -> Result<(), CoreError>
    where
        F: FnMut(&Connection) -> Result<(), rusqlite::Error>,
    {
        let mut last_error = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            let conn = self.connect()?;
            match op(&conn) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Clip index write failed");
                    last_error = Some(e);
                    std::thread::sleep(std::time::Duration::from_millis(50 * attempt as u64));
                }
            }
        }
        Err(CoreError::Conflict(format!(
            "Clip index write failed after {WRITE_ATTEMPTS} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Find a clip by its identifier.
    pub fn find_by_clip_id(&self, clip_id: &str) -> Result<Option<ClipRecord>, CoreError> {
        self.select_one("clip_id", clip_id)
    }

    /// Find a clip by its deduplication fingerprint.
    pub fn find_by_fingerprint(&self, clip_hash: &str) -> Result<Option<ClipRecord>, CoreError> {
        self.select_one("clip_hash", clip_hash)
    }

    fn select_one(&self, column: &str, value: &str) -> Result<Option<ClipRecord>, CoreError> {
        let conn = self.connect()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM clips WHERE {column} = ?1");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        let mut rows = stmt
            .query(rusqlite::params![value])
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        match rows.next().map_err(|e| CoreError::Backend(e.to_string()))? {
            Some(row) => Ok(Some(Self::row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// Query clips; every supplied filter applies conjunctively. Results
    /// come back newest first (ties in insertion order).
    pub fn query_clips(
        &self,
        filter: &ClipQueryFilter,
        limit: usize,
    ) -> Result<Vec<ClipRecord>, CoreError> {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        let mut add_in = |column: &str, values: &Option<Vec<String>>| {
            if let Some(values) = values {
                let placeholders: Vec<String> = values
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("?{}", params.len() + i + 1))
                    .collect();
                where_clauses.push(format!("{column} IN ({})", placeholders.join(",")));
                params.extend(values.iter().cloned());
            }
        };

        add_in("player_id", &filter.player_ids);
        add_in("game_id", &filter.game_ids);
        add_in("event_type", &filter.event_types);
        add_in("team_code", &filter.team_codes);

        let where_sql = if where_clauses.is_empty() {
            "1=1".to_string()
        } else {
            where_clauses.join(" AND ")
        };

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM clips WHERE {where_sql} \
             ORDER BY created_at DESC, rowid ASC LIMIT {limit}"
        );

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| CoreError::Backend(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| CoreError::Backend(e.to_string()))? {
            out.push(Self::row_to_record(row)?);
        }
        Ok(out)
    }

    /// All clips, newest first.
    pub fn get_all_clips(&self, limit: usize) -> Result<Vec<ClipRecord>, CoreError> {
        self.query_clips(&ClipQueryFilter::default(), limit)
    }

    /// Index statistics.
    pub fn get_stats(&self) -> Result<ClipIndexStats, CoreError> {
        let conn = self.connect()?;
        let map_err = |e: rusqlite::Error| CoreError::Backend(e.to_string());

        let total_clips: u64 = conn
            .query_row("SELECT COUNT(*) FROM clips", [], |r| r.get::<_, i64>(0))
            .map_err(map_err)? as u64;
        let total_size_bytes: u64 = conn
            .query_row(
                "SELECT COALESCE(SUM(file_size_bytes), 0) FROM clips",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map_err(map_err)? as u64;
        let total_duration_s: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(duration_s), 0.0) FROM clips",
                [],
                |r| r.get::<_, f64>(0),
            )
            .map_err(map_err)?;
        let unique_players: u64 = conn
            .query_row("SELECT COUNT(DISTINCT player_id) FROM clips", [], |r| {
                r.get::<_, i64>(0)
            })
            .map_err(map_err)? as u64;
        let unique_games: u64 = conn
            .query_row("SELECT COUNT(DISTINCT game_id) FROM clips", [], |r| {
                r.get::<_, i64>(0)
            })
            .map_err(map_err)? as u64;
        let cache_hits: u64 = conn
            .query_row("SELECT COUNT(*) FROM clips WHERE cache_hit = 1", [], |r| {
                r.get::<_, i64>(0)
            })
            .map_err(map_err)? as u64;

        Ok(ClipIndexStats {
            total_clips,
            total_size_bytes,
            total_size_mb: (total_size_bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0,
            total_duration_s,
            total_duration_min: (total_duration_s / 60.0 * 100.0).round() / 100.0,
            unique_players,
            unique_games,
            cache_hits,
            cache_hit_rate: if total_clips > 0 {
                (cache_hits as f64 / total_clips as f64 * 1000.0).round() / 10.0
            } else {
                0.0
            },
        })
    }

    /// Serialise the whole table to a parquet file for downstream
    /// data-lake consumption.
    pub fn export_to_columnar(&self, output_path: &Path) -> Result<(), CoreError> {
        let records = self.get_all_clips(usize::MAX >> 1)?;

        let mut df = df!(
            "clip_id" => records.iter().map(|r| r.clip_id.clone()).collect::<Vec<_>>(),
            "clip_hash" => records.iter().map(|r| r.clip_hash.clone()).collect::<Vec<_>>(),
            "output_path" => records.iter().map(|r| r.output_path.clone()).collect::<Vec<_>>(),
            "thumbnail_path" => records.iter().map(|r| r.thumbnail_path.clone()).collect::<Vec<_>>(),
            "source_video" => records.iter().map(|r| r.source_video.clone()).collect::<Vec<_>>(),
            "start_timecode_s" => records.iter().map(|r| r.start_timecode_s).collect::<Vec<_>>(),
            "end_timecode_s" => records.iter().map(|r| r.end_timecode_s).collect::<Vec<_>>(),
            "duration_s" => records.iter().map(|r| r.duration_s).collect::<Vec<_>>(),
            "game_id" => records.iter().map(|r| r.game_id.clone()).collect::<Vec<_>>(),
            "game_date" => records.iter().map(|r| r.game_date.clone()).collect::<Vec<_>>(),
            "season" => records.iter().map(|r| r.season.clone()).collect::<Vec<_>>(),
            "period" => records.iter().map(|r| r.period as i64).collect::<Vec<_>>(),
            "player_id" => records.iter().map(|r| r.player_id.clone()).collect::<Vec<_>>(),
            "player_name" => records.iter().map(|r| r.player_name.clone()).collect::<Vec<_>>(),
            "team_code" => records.iter().map(|r| r.team_code.clone()).collect::<Vec<_>>(),
            "opponent_code" => records.iter().map(|r| r.opponent_code.clone()).collect::<Vec<_>>(),
            "event_type" => records.iter().map(|r| r.event_type.clone()).collect::<Vec<_>>(),
            "outcome" => records.iter().map(|r| r.outcome.clone()).collect::<Vec<_>>(),
            "zone" => records.iter().map(|r| r.zone.clone()).collect::<Vec<_>>(),
            "file_size_bytes" => records.iter().map(|r| r.file_size_bytes as i64).collect::<Vec<_>>(),
            "processing_time_s" => records.iter().map(|r| r.processing_time_s).collect::<Vec<_>>(),
            "cache_hit" => records.iter().map(|r| r.cache_hit).collect::<Vec<_>>(),
            "extra_metadata" => records.iter().map(|r| r.extra_metadata.clone()).collect::<Vec<_>>(),
            "created_at" => records.iter().map(|r| r.created_at.to_rfc3339()).collect::<Vec<_>>(),
            "updated_at" => records.iter().map(|r| r.updated_at.to_rfc3339()).collect::<Vec<_>>(),
        )
        .map_err(|e| CoreError::Backend(format!("Export frame build failed: {e}")))?;

        let file = std::fs::File::create(output_path)
            .map_err(|e| CoreError::Backend(format!("Cannot create export file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| CoreError::Backend(format!("Parquet export failed: {e}")))?;

        tracing::info!(path = %output_path.display(), rows = records.len(), "Exported clip index");
        Ok(())
    }

    /// One-shot migration from the legacy JSON index
    /// (fingerprint -> entry). Returns the number of migrated rows and
    /// renames the JSON file with a `.backup` suffix on success.
    pub fn migrate_from_json(&self, json_path: &Path) -> Result<usize, CoreError> {
        if !json_path.exists() {
            return Ok(0);
        }

        let text = std::fs::read_to_string(json_path)
            .map_err(|e| CoreError::Backend(format!("Cannot read legacy index: {e}")))?;
        let legacy: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| CoreError::InvalidRequest(format!("Malformed legacy index: {e}")))?;

        let mut records = Vec::with_capacity(legacy.len());
        for (clip_hash, entry) in &legacy {
            let metadata = entry.get("metadata").cloned().unwrap_or_default();
            let get_str = |v: &serde_json::Value, key: &str| {
                v.get(key).and_then(|x| x.as_str()).map(str::to_string)
            };

            let game_id = get_str(&metadata, "game_id").unwrap_or_else(|| "unknown".to_string());
            let game_date = if game_id.len() >= 8 {
                game_id[..8].to_string()
            } else {
                "20250101".to_string()
            };
            let duration = entry
                .get("duration_s")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let now = Utc::now();

            records.push(ClipRecord {
                clip_id: get_str(entry, "clip_id").unwrap_or_else(|| clip_hash.clone()),
                clip_hash: clip_hash.clone(),
                output_path: get_str(entry, "output_path").unwrap_or_default(),
                thumbnail_path: get_str(entry, "thumbnail_path").unwrap_or_default(),
                source_video: String::new(),
                start_timecode_s: 0.0,
                end_timecode_s: duration,
                duration_s: duration,
                game_id,
                game_date,
                season: get_str(&metadata, "season").unwrap_or_else(|| "2025-2026".to_string()),
                period: metadata
                    .get("period")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1) as u32,
                player_id: get_str(&metadata, "player_id").unwrap_or_default(),
                player_name: None,
                team_code: String::new(),
                opponent_code: String::new(),
                event_type: get_str(&metadata, "event_type").unwrap_or_default(),
                outcome: get_str(&metadata, "outcome"),
                zone: None,
                file_size_bytes: entry
                    .get("file_size_bytes")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                processing_time_s: 0.0,
                cache_hit: false,
                extra_metadata: Some(metadata.to_string()),
                created_at: now,
                updated_at: now,
            });
        }

        self.batch_insert_clips(&records)?;

        let backup = json_path.with_extension("json.backup");
        std::fs::rename(json_path, &backup)
            .map_err(|e| CoreError::Backend(format!("Cannot back up legacy index: {e}")))?;
        tracing::info!(migrated = records.len(), "Migrated legacy JSON clip index");
        Ok(records.len())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ClipRecord, CoreError> {
        let map_err = |e: rusqlite::Error| CoreError::Backend(e.to_string());
        let created_at: String = row.get(23).map_err(map_err)?;
        let updated_at: String = row.get(24).map_err(map_err)?;

        Ok(ClipRecord {
            clip_id: row.get(0).map_err(map_err)?,
            clip_hash: row.get(1).map_err(map_err)?,
            output_path: row.get(2).map_err(map_err)?,
            thumbnail_path: row.get(3).map_err(map_err)?,
            source_video: row.get(4).map_err(map_err)?,
            start_timecode_s: row.get(5).map_err(map_err)?,
            end_timecode_s: row.get(6).map_err(map_err)?,
            duration_s: row.get(7).map_err(map_err)?,
            game_id: row.get(8).map_err(map_err)?,
            game_date: row.get(9).map_err(map_err)?,
            season: row.get(10).map_err(map_err)?,
            period: row.get::<_, i64>(11).map_err(map_err)? as u32,
            player_id: row.get(12).map_err(map_err)?,
            player_name: row.get(13).map_err(map_err)?,
            team_code: row.get(14).map_err(map_err)?,
            opponent_code: row.get(15).map_err(map_err)?,
            event_type: row.get(16).map_err(map_err)?,
            outcome: row.get(17).map_err(map_err)?,
            zone: row.get(18).map_err(map_err)?,
            file_size_bytes: row.get::<_, i64>(19).map_err(map_err)? as u64,
            processing_time_s: row.get(20).map_err(map_err)?,
            cache_hit: row.get::<_, i64>(21).map_err(map_err)? != 0,
            extra_metadata: row.get(22).map_err(map_err)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

}

fn execute_insert(
    conn: &Connection,
    record: &ClipRecord,
    now: DateTime<Utc>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        INSERT_SQL,
        rusqlite::params![
            record.clip_id,
            record.clip_hash,
            record.output_path,
            record.thumbnail_path,
            record.source_video,
            record.start_timecode_s,
            record.end_timecode_s,
            record.duration_s,
            record.game_id,
            record.game_date,
            record.season,
            record.period,
            record.player_id,
            record.player_name,
            record.team_code,
            record.opponent_code,
            record.event_type,
            record.outcome,
            record.zone,
            record.file_size_bytes as i64,
            record.processing_time_s,
            record.cache_hit as i64,
            record.extra_metadata,
            now.to_rfc3339(),
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
