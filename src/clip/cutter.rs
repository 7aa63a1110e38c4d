//! Clip cutter and worker pool.
//!
//! Cuts precise segments from period videos with bounded parallelism.
//! Two cutting strategies with mutual fallback:
//! - re-encode (H.264/AAC MP4, faststart, yuv420p) for frame-exact cuts
//! - stream copy with a 2 s pre-roll to hit a keyframe, preferred for
//!   shift clips to avoid long re-encodes
//!
//! Every successful cut lands in the clip index; cache consults by
//! fingerprint make repeated requests free.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::index::ClipIndex;
use super::types::{clip_fingerprint, ClipCutRequest, ClipCutResult, ClipMode, ClipRecord};

/// Error from the media runner.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    /// The tool exceeded its deadline and was killed.
    #[error("Media tool timed out after {0:?}")]
    Timeout(Duration),
    /// Non-zero exit status.
    #[error("Media tool failed: {0}")]
    Failed(String),
    /// Spawn or I/O failure.
    #[error("Media tool could not run: {0}")]
    Io(String),
}

/// Subprocess seam for ffmpeg/ffprobe.
///
/// Each task waits on its own subprocess with its own timeout; no
/// subprocess state is shared across tasks.
#[async_trait]
pub trait MediaRunner: Send + Sync {
    /// Probe a source's duration in seconds.
    async fn probe_duration(&self, source: &Path) -> Result<f64, MediaError>;

    /// Run a transcoder invocation to completion within the deadline.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<(), MediaError>;
}

/// Production runner shelling out to ffmpeg/ffprobe.
#[derive(Debug, Default)]
pub struct FfmpegRunner;

#[async_trait]
impl MediaRunner for FfmpegRunner {
    async fn probe_duration(&self, source: &Path) -> Result<f64, MediaError> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .output()
            .await
            .map_err(|e| MediaError::Io(e.to_string()))?;

        if !output.status.success() {
            return Err(MediaError::Failed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| MediaError::Failed(format!("Unparseable duration: {e}")))
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<(), MediaError> {
        let child = tokio::process::Command::new("ffmpeg")
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            // Timed-out invocations must not leave orphan encoders behind.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Io(e.to_string()))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(MediaError::Failed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            )),
            Ok(Err(e)) => Err(MediaError::Io(e.to_string())),
            Err(_) => Err(MediaError::Timeout(timeout)),
        }
    }
}

/// Cutter configuration.
#[derive(Debug, Clone)]
pub struct ClipCutterConfig {
    /// Base directory for generated clips.
    pub output_base_dir: PathBuf,
    /// Bounded worker-pool size.
    pub max_workers: usize,
    /// Encoder preset.
    pub ffmpeg_preset: String,
    /// Constant rate factor (18-28, lower = better).
    pub crf: u32,
    /// Soft cap on clip duration in seconds.
    pub max_clip_duration_s: u32,
    /// Whether the stream-copy path may be used as primary/fallback.
    pub enable_stream_copy_fallback: bool,
    /// Whether to package HLS after a successful cut.
    pub enable_hls: bool,
    /// HLS segment length in seconds.
    pub hls_segment_time: u32,
}

impl Default for ClipCutterConfig {
    fn default() -> Self {
        Self {
            output_base_dir: PathBuf::from("data/clips/generated"),
            max_workers: 2,
            ffmpeg_preset: "ultrafast".to_string(),
            crf: 20,
            max_clip_duration_s: 120,
            enable_stream_copy_fallback: true,
            enable_hls: true,
            hls_segment_time: 2,
        }
    }
}

/// Bounds computed for one cut after probing and clamping.
#[derive(Debug, Clone, Copy)]
struct CutBounds {
    start_s: f64,
    end_s: f64,
    duration_s: f64,
}

/// Cuts video clips with caching, fallback, and bounded parallelism.
pub struct ClipCutter {
    config: ClipCutterConfig,
    index: Arc<ClipIndex>,
    runner: Arc<dyn MediaRunner>,
    workers: Arc<Semaphore>,
}

impl ClipCutter {
    /// Create a cutter over the index and media runner.
    pub fn new(
        config: ClipCutterConfig,
        index: Arc<ClipIndex>,
        runner: Arc<dyn MediaRunner>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            config,
            index,
            runner,
            workers,
        }
    }

    /// The cutter's output base directory.
    pub fn output_base_dir(&self) -> &Path {
        &self.config.output_base_dir
    }

    /// Cut a single clip.
    ///
    /// Validation failures and transcoder failures come back as
    /// unsuccessful results, never panics; the filesystem is untouched on
    /// invalid requests.
    pub async fn cut(&self, request: &ClipCutRequest) -> ClipCutResult {
        let started = Instant::now();

        if let Err(message) = request.validate() {
            return ClipCutResult::failure(
                &request.clip_id,
                started.elapsed().as_secs_f64(),
                format!("Invalid clip request: {message}"),
            );
        }

        let fingerprint = clip_fingerprint(
            &request.source_video,
            request.start_seconds,
            request.end_seconds,
        );

        // Cache consult: a hit whose file still exists costs nothing.
        match self.index.find_by_fingerprint(&fingerprint) {
            Ok(Some(cached)) if Path::new(&cached.output_path).exists() => {
                tracing::info!(clip_id = %request.clip_id, "Clip cache hit");
                return ClipCutResult {
                    success: true,
                    clip_id: request.clip_id.clone(),
                    output_path: Some(PathBuf::from(&cached.output_path)),
                    thumbnail_path: Some(PathBuf::from(&cached.thumbnail_path)),
                    hls_playlist_path: None,
                    duration_s: Some(cached.duration_s),
                    file_size_bytes: Some(cached.file_size_bytes),
                    processing_time_s: started.elapsed().as_secs_f64(),
                    cache_hit: true,
                    error_message: None,
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Clip index lookup failed, cutting anyway");
            }
        }

        let bounds = self.clamp_bounds(request).await;

        if let Some(parent) = request.output_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ClipCutResult::failure(
                    &request.clip_id,
                    started.elapsed().as_secs_f64(),
                    format!("Cannot create output directory: {e}"),
                );
            }
        }

        let prefer_copy = request.metadata.mode == Some(ClipMode::Shift)
            && self.config.enable_stream_copy_fallback;

        let cut = if prefer_copy {
            match self.run_copy(request, bounds).await {
                Ok(b) => Ok(b),
                Err(copy_err) => self.run_reencode(request, bounds).await.map_err(|enc_err| {
                    format!("Stream copy failed: {copy_err}; re-encode fallback failed: {enc_err}")
                }),
            }
        } else {
            match self.run_reencode(request, bounds).await {
                Ok(b) => Ok(b),
                Err(enc_err) if self.config.enable_stream_copy_fallback => {
                    self.run_copy(request, bounds).await.map_err(|copy_err| {
                        format!("Re-encode failed: {enc_err}; copy fallback failed: {copy_err}")
                    })
                }
                Err(enc_err) => Err(format!("Re-encode failed: {enc_err}")),
            }
        };

        let actual = match cut {
            Ok(actual) => actual,
            Err(message) => {
                return ClipCutResult::failure(
                    &request.clip_id,
                    started.elapsed().as_secs_f64(),
                    message,
                )
            }
        };

        let thumbnail_path = self.make_thumbnail(request, actual.duration_s).await;
        let hls_playlist_path = if self.config.enable_hls {
            self.package_hls(request).await
        } else {
            None
        };

        let file_size = std::fs::metadata(&request.output_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let record = self.build_record(
            request,
            &fingerprint,
            actual,
            &thumbnail_path,
            hls_playlist_path.as_deref(),
            file_size,
            started.elapsed().as_secs_f64(),
        );

        // Submit to the index off the async workers; the index retries
        // transient conflicts internally.
        let index = Arc::clone(&self.index);
        let insert = tokio::task::spawn_blocking(move || index.insert_clip(&record)).await;
        match insert {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return ClipCutResult::failure(
                    &request.clip_id,
                    started.elapsed().as_secs_f64(),
                    format!("Clip cut but index write failed: {e}"),
                );
            }
            Err(e) => {
                return ClipCutResult::failure(
                    &request.clip_id,
                    started.elapsed().as_secs_f64(),
                    format!("Index writer panicked: {e}"),
                );
            }
        }

        ClipCutResult {
            success: true,
            clip_id: request.clip_id.clone(),
            output_path: Some(request.output_path.clone()),
            thumbnail_path,
            hls_playlist_path,
            duration_s: Some(actual.duration_s),
            file_size_bytes: Some(file_size),
            processing_time_s: started.elapsed().as_secs_f64(),
            cache_hit: false,
            error_message: None,
        }
    }

    /// Cut many clips with bounded parallelism.
    ///
    /// The output vector matches the input order regardless of completion
    /// order; a worker failure yields a failure result for that request
    /// only.
    pub async fn cut_parallel(self: &Arc<Self>, requests: Vec<ClipCutRequest>) -> Vec<ClipCutResult> {
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let cutter = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = match cutter.workers.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ClipCutResult::failure(&request.clip_id, 0.0, "Worker pool closed")
                    }
                };
                let result = cutter.cut(&request).await;
                let status = if result.success { "OK" } else { "FAIL" };
                tracing::info!(
                    clip_id = %result.clip_id,
                    status,
                    processing_time_s = result.processing_time_s,
                    "Clip cut finished"
                );
                result
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (idx, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(index = idx, error = %e, "Clip worker panicked");
                    results.push(ClipCutResult::failure(
                        &format!("request_{idx}"),
                        0.0,
                        format!("Worker exception: {e}"),
                    ));
                }
            }
        }
        results
    }

    /// Probe the source and clamp the requested bounds into it, capping
    /// the duration at the configured maximum.
    async fn clamp_bounds(&self, request: &ClipCutRequest) -> CutBounds {
        let (mut start_s, mut end_s) = (request.start_seconds, request.end_seconds);

        match self.runner.probe_duration(&request.source_video).await {
            Ok(video_duration) => {
                start_s = start_s.max(0.0);
                end_s = end_s.min(video_duration);
                if end_s - start_s < 0.1 {
                    // Near-empty windows clamp up to a minimum viable clip.
                    end_s = (start_s + 0.1).min(video_duration);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine video duration");
            }
        }

        let duration_s = (end_s - start_s).min(self.config.max_clip_duration_s as f64);
        CutBounds {
            start_s,
            end_s,
            duration_s,
        }
    }

    async fn run_reencode(
        &self,
        request: &ClipCutRequest,
        bounds: CutBounds,
    ) -> Result<CutBounds, MediaError> {
        let args = reencode_args(
            &request.source_video,
            bounds.start_s,
            bounds.duration_s,
            &self.config.ffmpeg_preset,
            self.config.crf,
            &request.output_path,
        );
        let timeout = reencode_timeout(bounds.duration_s);
        self.runner.run(&args, timeout).await?;
        Ok(bounds)
    }

    /// Stream copy with a slight pre-roll to hit a keyframe; writes to a
    /// temp file and renames into place.
    async fn run_copy(
        &self,
        request: &ClipCutRequest,
        bounds: CutBounds,
    ) -> Result<CutBounds, MediaError> {
        let preroll = if bounds.start_s >= 2.0 { 2.0 } else { 0.0 };
        let copy_start = (bounds.start_s - preroll).max(0.0);
        let copy_duration =
            (bounds.duration_s + preroll).min(self.config.max_clip_duration_s as f64);

        let tmp_path = request.output_path.with_extension("copy.tmp.mp4");
        let args = copy_args(&request.source_video, copy_start, copy_duration, &tmp_path);
        let timeout = copy_timeout(copy_duration);
        self.runner.run(&args, timeout).await?;

        std::fs::rename(&tmp_path, &request.output_path)
            .map_err(|e| MediaError::Io(format!("Cannot move copy into place: {e}")))?;

        Ok(CutBounds {
            start_s: copy_start,
            end_s: copy_start + copy_duration,
            duration_s: copy_duration,
        })
    }

    async fn make_thumbnail(&self, request: &ClipCutRequest, duration_s: f64) -> Option<PathBuf> {
        let thumbnail_path = request.output_path.with_extension("jpg");
        let thumb_time = (duration_s / 2.0).min(5.0);
        let args = thumbnail_args(&request.output_path, thumb_time, &thumbnail_path);

        match self.runner.run(&args, Duration::from_secs(10)).await {
            Ok(()) => Some(thumbnail_path),
            Err(e) => {
                tracing::warn!(clip_id = %request.clip_id, error = %e, "Thumbnail failed");
                None
            }
        }
    }

    async fn package_hls(&self, request: &ClipCutRequest) -> Option<PathBuf> {
        let stem = request.output_path.file_stem()?.to_string_lossy().to_string();
        let hls_dir = request.output_path.parent()?.join(format!("hls_{stem}"));
        if let Err(e) = std::fs::create_dir_all(&hls_dir) {
            tracing::warn!(error = %e, "Cannot create HLS directory");
            return None;
        }

        let playlist = hls_dir.join("playlist.m3u8");
        let segment_pattern = hls_dir.join("seg_%03d.ts");
        let args = hls_args(
            &request.output_path,
            self.config.hls_segment_time,
            &segment_pattern,
            &playlist,
        );

        match self.runner.run(&args, Duration::from_secs(60)).await {
            Ok(()) => Some(playlist),
            Err(e) => {
                tracing::warn!(clip_id = %request.clip_id, error = %e, "HLS packaging failed");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        request: &ClipCutRequest,
        fingerprint: &str,
        bounds: CutBounds,
        thumbnail_path: &Option<PathBuf>,
        hls_playlist_path: Option<&Path>,
        file_size: u64,
        processing_time_s: f64,
    ) -> ClipRecord {
        let metadata = &request.metadata;
        let game_id = metadata
            .game_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let game_date = if game_id.len() >= 8 {
            game_id[..8].to_string()
        } else {
            "20250101".to_string()
        };

        let mut extra = metadata.extra.clone();
        if let Some(playlist) = hls_playlist_path {
            extra.insert(
                "hls_playlist".to_string(),
                serde_json::Value::String(playlist.display().to_string()),
            );
        }
        let extra_metadata = if extra.is_empty() {
            None
        } else {
            serde_json::to_string(&extra).ok()
        };

        let now = chrono::Utc::now();
        ClipRecord {
            clip_id: request.clip_id.clone(),
            clip_hash: fingerprint.to_string(),
            output_path: request.output_path.display().to_string(),
            thumbnail_path: thumbnail_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            source_video: request.source_video.display().to_string(),
            start_timecode_s: bounds.start_s,
            end_timecode_s: bounds.end_s,
            duration_s: bounds.duration_s,
            game_id,
            game_date,
            season: metadata
                .season
                .clone()
                .unwrap_or_else(|| "2025-2026".to_string()),
            period: metadata.period.unwrap_or(1),
            player_id: metadata.player_id.clone().unwrap_or_default(),
            player_name: metadata.player_name.clone(),
            team_code: metadata.team_code.clone().unwrap_or_default(),
            opponent_code: metadata.opponent_code.clone().unwrap_or_default(),
            event_type: metadata.event_type.clone().unwrap_or_default(),
            outcome: metadata.outcome.clone(),
            zone: metadata.zone.clone(),
            file_size_bytes: file_size,
            processing_time_s,
            cache_hit: false,
            extra_metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Re-encode timeout: `min(600, max(60, duration * 2.0))` seconds.
fn reencode_timeout(duration_s: f64) -> Duration {
    Duration::from_secs_f64((duration_s * 2.0).clamp(60.0, 600.0))
}

/// Stream-copy timeout: `min(300, max(60, duration * 1.2))` seconds.
fn copy_timeout(duration_s: f64) -> Duration {
    Duration::from_secs_f64((duration_s * 1.2).clamp(60.0, 300.0))
}

fn reencode_args(
    source: &Path,
    start_s: f64,
    duration_s: f64,
    preset: &str,
    crf: u32,
    output: &Path,
) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        start_s.to_string(),
        "-i".into(),
        source.display().to_string(),
        "-t".into(),
        duration_s.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        preset.to_string(),
        "-crf".into(),
        crf.to_string(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-y".into(),
        output.display().to_string(),
    ]
}

fn copy_args(source: &Path, start_s: f64, duration_s: f64, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        start_s.to_string(),
        "-i".into(),
        source.display().to_string(),
        "-t".into(),
        duration_s.to_string(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-avoid_negative_ts".into(),
        "1".into(),
        "-y".into(),
        output.display().to_string(),
    ]
}

fn thumbnail_args(clip: &Path, thumb_time_s: f64, thumbnail: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        thumb_time_s.to_string(),
        "-i".into(),
        clip.display().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-qscale:v".into(),
        "2".into(),
        "-y".into(),
        thumbnail.display().to_string(),
    ]
}

fn hls_args(clip: &Path, segment_time: u32, segment_pattern: &Path, playlist: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        clip.display().to_string(),
        "-c".into(),
        "copy".into(),
        "-start_number".into(),
        "0".into(),
        "-hls_time".into(),
        segment_time.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        segment_pattern.display().to_string(),
        playlist.display().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::types::ClipJobMetadata;
    use parking_lot::Mutex;

    /// Fake runner that "cuts" by writing the output file, recording
    /// every invocation. Optionally fails the first N ffmpeg runs.
    struct FakeRunner {
        invocations: Mutex<Vec<Vec<String>>>,
        fail_first: Mutex<usize>,
        probe_duration: f64,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                invocations: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
                probe_duration: 1200.0,
            }
        }

        fn failing_first(n: usize) -> Self {
            let runner = Self::new();
            *runner.fail_first.lock() = n;
            runner
        }

        fn invocations(&self) -> Vec<Vec<String>> {
            self.invocations.lock().clone()
        }

        fn output_target(args: &[String]) -> PathBuf {
            PathBuf::from(args.last().expect("args end with the output path"))
        }
    }

    #[async_trait]
    impl MediaRunner for FakeRunner {
        async fn probe_duration(&self, _source: &Path) -> Result<f64, MediaError> {
            Ok(self.probe_duration)
        }

        async fn run(&self, args: &[String], _timeout: Duration) -> Result<(), MediaError> {
            self.invocations.lock().push(args.to_vec());
            {
                let mut fail = self.fail_first.lock();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(MediaError::Failed("synthetic failure".to_string()));
                }
            }
            std::fs::write(Self::output_target(args), b"fake media")
                .map_err(|e| MediaError::Io(e.to_string()))?;
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cutter: Arc<ClipCutter>,
        index: Arc<ClipIndex>,
        runner: Arc<FakeRunner>,
        source: PathBuf,
        out_dir: PathBuf,
    }

    fn fixture_with(runner: FakeRunner, hls: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("p1.mp4");
        std::fs::write(&source, b"source").unwrap();
        let out_dir = dir.path().join("generated");

        let index = Arc::new(ClipIndex::open(dir.path().join("clip_index.db")).unwrap());
        let runner = Arc::new(runner);
        let config = ClipCutterConfig {
            output_base_dir: out_dir.clone(),
            enable_hls: hls,
            ..Default::default()
        };
        let cutter = Arc::new(ClipCutter::new(
            config,
            Arc::clone(&index),
            Arc::clone(&runner) as Arc<dyn MediaRunner>,
        ));

        Fixture {
            _dir: dir,
            cutter,
            index,
            runner,
            source,
            out_dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeRunner::new(), false)
    }

    fn request(f: &Fixture, clip_id: &str, start: f64, end: f64) -> ClipCutRequest {
        ClipCutRequest {
            source_video: f.source.clone(),
            start_seconds: start,
            end_seconds: end,
            output_path: f.out_dir.join(format!("{clip_id}.mp4")),
            clip_id: clip_id.to_string(),
            metadata: ClipJobMetadata {
                game_id: Some("20031".to_string()),
                period: Some(1),
                player_id: Some("8478463".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_successful_cut_records_index_entry() {
        let f = fixture();
        let result = f.cutter.cut(&request(&f, "c1", 10.0, 18.0)).await;

        assert!(result.success, "{:?}", result.error_message);
        assert!(!result.cache_hit);
        assert!(result.output_path.as_ref().unwrap().exists());
        assert!(result.thumbnail_path.is_some());
        assert_eq!(result.duration_s, Some(8.0));

        let record = f.index.find_by_clip_id("c1").unwrap().unwrap();
        assert_eq!(record.game_id, "20031");
        assert_eq!(record.duration_s, 8.0);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let f = fixture();
        let mut bad = request(&f, "c1", 10.0, 5.0);
        bad.output_path = f.out_dir.join("never.mp4");

        let result = f.cutter.cut(&bad).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Invalid clip request"));
        assert!(f.runner.invocations().is_empty());
        assert!(!f.out_dir.exists());
    }

    #[tokio::test]
    async fn test_second_cut_is_cache_hit_without_subprocess() {
        let f = fixture();
        let first = f.cutter.cut(&request(&f, "c1", 10.0, 18.0)).await;
        assert!(first.success);
        let runs_after_first = f.runner.invocations().len();

        // Same (source, start, end) triple, different clip id.
        let second = f.cutter.cut(&request(&f, "c2", 10.0, 18.0)).await;
        assert!(second.success);
        assert!(second.cache_hit);
        assert_eq!(f.runner.invocations().len(), runs_after_first);

        // Exactly one physical record behind both calls.
        let fingerprint = clip_fingerprint(&f.source, 10.0, 18.0);
        let cached = f.index.find_by_fingerprint(&fingerprint).unwrap().unwrap();
        assert_eq!(cached.clip_id, "c1");
        assert_eq!(f.index.get_stats().unwrap().total_clips, 1);
    }

    #[tokio::test]
    async fn test_reencode_failure_falls_back_to_copy() {
        let f = fixture_with(FakeRunner::failing_first(1), false);
        let result = f.cutter.cut(&request(&f, "c1", 10.0, 18.0)).await;

        assert!(result.success, "{:?}", result.error_message);
        let invocations = f.runner.invocations();
        // First invocation re-encodes, second stream-copies.
        assert!(invocations[0].contains(&"libx264".to_string()));
        assert!(invocations[1].contains(&"copy".to_string()));
        // Copy applied the 2s pre-roll.
        assert_eq!(result.duration_s, Some(10.0));
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_failure_with_combined_message() {
        let f = fixture_with(FakeRunner::failing_first(2), false);
        let result = f.cutter.cut(&request(&f, "c1", 10.0, 18.0)).await;

        assert!(!result.success);
        let message = result.error_message.unwrap();
        assert!(message.contains("Re-encode failed"));
        assert!(message.contains("copy fallback failed"));
        assert!(f.index.find_by_clip_id("c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shift_mode_prefers_stream_copy() {
        let f = fixture();
        let mut shift_request = request(&f, "s1", 100.0, 130.0);
        shift_request.metadata.mode = Some(ClipMode::Shift);

        let result = f.cutter.cut(&shift_request).await;
        assert!(result.success);
        let invocations = f.runner.invocations();
        assert!(invocations[0].contains(&"copy".to_string()));
        assert!(!invocations[0].contains(&"libx264".to_string()));
    }

    #[tokio::test]
    async fn test_bounds_clamped_to_probed_duration() {
        let f = fixture();
        // Probe reports 1200s; request reaches past the end.
        let result = f.cutter.cut(&request(&f, "c1", 1195.0, 1290.0)).await;
        assert!(result.success);
        assert_eq!(result.duration_s, Some(5.0));
    }

    #[tokio::test]
    async fn test_tiny_window_clamps_up() {
        let f = fixture();
        let result = f.cutter.cut(&request(&f, "c1", 1195.0, 1195.05)).await;
        assert!(result.success);
        let duration = result.duration_s.unwrap();
        assert!(duration >= 0.1 - 1e-9, "duration was {duration}");
    }

    #[tokio::test]
    async fn test_hls_packaging_records_playlist() {
        let f = fixture_with(FakeRunner::new(), true);
        let result = f.cutter.cut(&request(&f, "c1", 10.0, 18.0)).await;

        assert!(result.success);
        let playlist = result.hls_playlist_path.unwrap();
        assert!(playlist.ends_with("hls_c1/playlist.m3u8"));

        let record = f.index.find_by_clip_id("c1").unwrap().unwrap();
        assert!(record.extra_metadata.unwrap().contains("hls_playlist"));
    }

    #[tokio::test]
    async fn test_cut_parallel_preserves_input_order() {
        let f = fixture();
        // R2 is the shortest clip and will finish first with real media;
        // the fake runner keeps timing uniform, so assert on ids.
        let requests = vec![
            request(&f, "r1", 10.0, 40.0),
            request(&f, "r2", 50.0, 52.0),
            request(&f, "r3", 60.0, 90.0),
        ];

        let results = f.cutter.cut_parallel(requests).await;
        let ids: Vec<_> = results.iter().map(|r| r.clip_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_timeout_formulas() {
        assert_eq!(reencode_timeout(10.0), Duration::from_secs(60));
        assert_eq!(reencode_timeout(100.0), Duration::from_secs(200));
        assert_eq!(reencode_timeout(1000.0), Duration::from_secs(600));
        assert_eq!(copy_timeout(10.0), Duration::from_secs(60));
        assert_eq!(copy_timeout(100.0), Duration::from_secs(120));
        assert_eq!(copy_timeout(1000.0), Duration::from_secs(300));
    }
}
