//! End-to-end tests for the clip pipeline: extract -> cut -> index.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rink_oms::clip::{
    clip_fingerprint, ClipCutRequest, ClipCutResult, ClipCutter, ClipCutterConfig, ClipExtractor,
    ClipIndex, ClipJobMetadata, ClipMode, ClipQueryFilter, ClipSearchParams, MediaError,
    MediaRunner, MetricsCatalog, PlayerRef, StaticRoster, StaticSchedule,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const TIMELINE: &str = "\
period,timecode,player_id,action,zone,outcome,team,team_code,opponent,period_time
1,00:03:40:00,8478463.0,CONTROLLED EXIT FROM DZ,DZ,successful,Canadiens,MTL,CHI,16:20
1,00:06:00:00,8478463.0,SLOT SHOT FOR ONNET,OZ,,Canadiens,MTL,CHI,14:00
1,00:19:00:00,8478463.0,PUCK GIVEAWAY,NZ,,Canadiens,MTL,CHI,1:00
";

/// Runner that simulates ffmpeg: writes the output file after an optional
/// per-invocation delay keyed by clip duration (shorter clips "finish"
/// first).
struct SimulatedRunner {
    runs: parking_lot::Mutex<usize>,
    simulate_speed: bool,
}

impl SimulatedRunner {
    fn new(simulate_speed: bool) -> Self {
        Self {
            runs: parking_lot::Mutex::new(0),
            simulate_speed,
        }
    }

    fn runs(&self) -> usize {
        *self.runs.lock()
    }
}

#[async_trait]
impl MediaRunner for SimulatedRunner {
    async fn probe_duration(&self, _source: &Path) -> Result<f64, MediaError> {
        Ok(1200.0)
    }

    async fn run(&self, args: &[String], _timeout: Duration) -> Result<(), MediaError> {
        *self.runs.lock() += 1;

        if self.simulate_speed {
            // Scale sleep with the requested duration (-t flag) so longer
            // clips genuinely finish later.
            let duration = args
                .iter()
                .position(|a| a == "-t")
                .and_then(|i| args.get(i + 1))
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(1.0);
            tokio::time::sleep(Duration::from_millis((duration * 2.0) as u64)).await;
        }

        let output = PathBuf::from(args.last().expect("output path"));
        std::fs::write(output, b"media").map_err(|e| MediaError::Io(e.to_string()))?;
        Ok(())
    }
}

struct Pipeline {
    _dir: tempfile::TempDir,
    extractor: ClipExtractor,
    cutter: Arc<ClipCutter>,
    index: Arc<ClipIndex>,
    runner: Arc<SimulatedRunner>,
    source: PathBuf,
    out_dir: PathBuf,
}

fn pipeline(simulate_speed: bool) -> Pipeline {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let metrics = dir.path().join("metrics");
    let clips = dir.path().join("clips");
    std::fs::create_dir_all(&metrics).unwrap();

    std::fs::write(
        metrics.join("20251011-NHL-MTLvsCHI-20252026-20031_player_tendencies_timeline.csv"),
        TIMELINE,
    )
    .unwrap();

    let video_dir = clips.join("2025-2026").join("team").join("MTL");
    std::fs::create_dir_all(&video_dir).unwrap();
    let source = video_dir.join("p1-20251011-NHL-MTLvsCHI-20252026-20031.mp4");
    std::fs::write(&source, b"period video").unwrap();

    let mut roster = StaticRoster::new();
    roster.add(8478463, "Anthony Beauvillier", "MTL");
    let mut schedule = StaticSchedule::new();
    schedule.add_game("MTL", "20031", "2025-10-11");

    let catalog = MetricsCatalog::new(&metrics, &clips);
    let extractor = ClipExtractor::new(catalog, Arc::new(roster), Arc::new(schedule));

    let index = Arc::new(ClipIndex::open(dir.path().join("clip_index.db")).unwrap());
    let runner = Arc::new(SimulatedRunner::new(simulate_speed));
    let out_dir = dir.path().join("generated");

    let cutter = Arc::new(ClipCutter::new(
        ClipCutterConfig {
            output_base_dir: out_dir.clone(),
            max_workers: 3,
            enable_hls: false,
            ..Default::default()
        },
        Arc::clone(&index),
        Arc::clone(&runner) as Arc<dyn MediaRunner>,
    ));

    Pipeline {
        _dir: dir,
        extractor,
        cutter,
        index,
        runner,
        source,
        out_dir,
    }
}

fn cut_request(p: &Pipeline, clip_id: &str, start: f64, end: f64) -> ClipCutRequest {
    ClipCutRequest {
        source_video: p.source.clone(),
        start_seconds: start,
        end_seconds: end,
        output_path: p.out_dir.join(format!("{clip_id}.mp4")),
        clip_id: clip_id.to_string(),
        metadata: ClipJobMetadata {
            game_id: Some("20031".to_string()),
            period: Some(1),
            player_id: Some("8478463".to_string()),
            ..Default::default()
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EXTRACT → CUT → INDEX
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_extract_then_cut_then_query() {
    let p = pipeline(false);

    let mut params = ClipSearchParams::new();
    params.players = vec![PlayerRef::Id(8478463)];
    params.event_types = vec!["zone_exit".to_string()];
    params.game_ids = Some(vec!["20031".to_string()]);

    let segments = p.extractor.query(&params).unwrap();
    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    assert!(segment.period_video_path.is_some());

    let request = ClipCutRequest {
        source_video: segment.period_video_path.clone().unwrap(),
        start_seconds: segment.start_timecode_s,
        end_seconds: segment.end_timecode_s,
        output_path: p.out_dir.join(format!("{}.mp4", segment.clip_id)),
        clip_id: segment.clip_id.clone(),
        metadata: ClipJobMetadata::from_segment(segment),
    };

    let result = p.cutter.cut(&request).await;
    assert!(result.success, "{:?}", result.error_message);

    let filter = ClipQueryFilter {
        player_ids: Some(vec!["8478463".to_string()]),
        game_ids: Some(vec!["20031".to_string()]),
        ..Default::default()
    };
    let records = p.index.query_clips(&filter, 100).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_type, "CONTROLLED EXIT FROM DZ");
    assert_eq!(records[0].period, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// SCENARIO: clip-cutter cache hit
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cache_hit_on_identical_triple() {
    let p = pipeline(false);

    let first = p.cutter.cut(&cut_request(&p, "c1", 10.0, 18.0)).await;
    assert!(first.success);
    assert!(!first.cache_hit);
    let runs_after_first = p.runner.runs();

    let second = p.cutter.cut(&cut_request(&p, "c2", 10.0, 18.0)).await;
    assert!(second.success);
    assert!(second.cache_hit);
    assert!(second.processing_time_s < 0.05);
    // No subprocess spawned for the cached call.
    assert_eq!(p.runner.runs(), runs_after_first);

    // Exactly one index row carries the shared fingerprint.
    let fingerprint = clip_fingerprint(&p.source, 10.0, 18.0);
    let record = p.index.find_by_fingerprint(&fingerprint).unwrap().unwrap();
    assert_eq!(record.clip_id, "c1");
    assert_eq!(p.index.get_stats().unwrap().total_clips, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// SCENARIO: parallel order preservation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cut_parallel_preserves_order_despite_finish_order() {
    let p = pipeline(true);

    // R2 is much shorter than R1/R3 and finishes first.
    let requests = vec![
        cut_request(&p, "r1", 10.0, 60.0),
        cut_request(&p, "r2", 100.0, 101.0),
        cut_request(&p, "r3", 200.0, 250.0),
    ];

    let results: Vec<ClipCutResult> = p.cutter.cut_parallel(requests).await;
    let ids: Vec<_> = results.iter().map(|r| r.clip_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2", "r3"]);
    assert!(results.iter().all(|r| r.success));
}

// ─────────────────────────────────────────────────────────────────────────────
// Index round trip and idempotence
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_double_insert_leaves_one_row_with_advanced_updated_at() {
    let p = pipeline(false);

    let result = p.cutter.cut(&cut_request(&p, "c1", 10.0, 18.0)).await;
    assert!(result.success);
    let before = p.index.find_by_clip_id("c1").unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    p.index.insert_clip(&before).unwrap();
    let after = p.index.find_by_clip_id("c1").unwrap().unwrap();

    assert_eq!(p.index.get_stats().unwrap().total_clips, 1);
    assert!(after.updated_at > before.updated_at);
}

#[tokio::test]
async fn test_export_reingest_equal_multiset() {
    use polars::prelude::*;

    let p = pipeline(false);
    for (i, (start, end)) in [(10.0, 18.0), (30.0, 40.0), (50.0, 55.0)].iter().enumerate() {
        let result = p
            .cutter
            .cut(&cut_request(&p, &format!("c{i}"), *start, *end))
            .await;
        assert!(result.success);
    }

    let export = p.out_dir.join("export.parquet");
    p.index.export_to_columnar(&export).unwrap();

    let df = ParquetReader::new(std::fs::File::open(&export).unwrap())
        .finish()
        .unwrap();
    assert_eq!(df.height(), 3);

    let mut exported: Vec<String> = df
        .column("clip_hash")
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
        .into_no_null_iter()
        .map(str::to_string)
        .collect();
    exported.sort();

    let mut stored: Vec<String> = p
        .index
        .get_all_clips(100)
        .unwrap()
        .into_iter()
        .map(|r| r.clip_hash)
        .collect();
    stored.sort();

    assert_eq!(exported, stored);
}

// ─────────────────────────────────────────────────────────────────────────────
// Shift mode through the pipeline
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shift_segments_map_through_period_offsets() {
    let p = pipeline(false);

    // Write a shift export next to the timeline.
    let shifts = serde_json::json!({
        "game_info": {"home_team": "Canadiens", "away_team": "Blackhawks"},
        "player_shifts": {"shifts": [{
            "player_id": "8478463",
            "start_period": 1,
            "start_timecode_abs": 220.0,
            "end_timecode_abs": 260.0,
            "opponents_seen_ids": [],
            "team": "Canadiens",
            "team_code": "MTL",
            "team_side": "home",
            "strength_start": "5v5",
            "shift_number": 1
        }]}
    });
    std::fs::write(
        p._dir
            .path()
            .join("metrics")
            .join("20251011-NHL-MTLvsCHI-20252026-20031_comprehensive_metrics.json"),
        serde_json::to_string(&shifts).unwrap(),
    )
    .unwrap();

    let mut params = ClipSearchParams::new();
    params.players = vec![PlayerRef::Id(8478463)];
    params.mode = ClipMode::Shift;
    params.game_ids = Some(vec!["20031".to_string()]);

    let segments = p.extractor.query(&params).unwrap();
    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    // Period 1 has offset 0: absolute == period-relative.
    assert!((segment.start_timecode_s - 220.0).abs() < 1e-9);
    assert!((segment.duration_s - 40.0).abs() < 1e-9);
    assert_eq!(segment.mode, ClipMode::Shift);

    // Shift cuts go down the stream-copy path.
    let request = ClipCutRequest {
        source_video: segment.period_video_path.clone().unwrap(),
        start_seconds: segment.start_timecode_s,
        end_seconds: segment.end_timecode_s,
        output_path: p.out_dir.join(format!("{}.mp4", segment.clip_id)),
        clip_id: segment.clip_id.clone(),
        metadata: ClipJobMetadata::from_segment(segment),
    };
    let result = p.cutter.cut(&request).await;
    assert!(result.success);
    // Copy pre-roll extends the clip by 2s.
    assert_eq!(result.duration_s, Some(42.0));
}
