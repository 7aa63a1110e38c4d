//! Clip extraction and indexing pipeline.
//!
//! The extractor derives time-bounded segments from per-game analytics
//! exports; the cutter turns segments into MP4 files (with thumbnails and
//! optional HLS packaging) under a bounded worker pool; the index records
//! every produced clip and serves fingerprint-based deduplication.

pub mod catalog;
pub mod cutter;
pub mod extractor;
pub mod index;
pub mod roster;
pub mod taxonomy;
pub mod types;

pub use catalog::{GameInfo, MetricsCatalog, ShiftRow, TimelineRow};
pub use cutter::{ClipCutter, ClipCutterConfig, FfmpegRunner, MediaError, MediaRunner};
pub use extractor::ClipExtractor;
pub use index::{ClipIndex, ClipIndexStats, ClipQueryFilter, CLIPS_TABLE_SCHEMA};
pub use roster::{RosterLookup, RosterPlayer, ScheduleLookup, StaticRoster, StaticSchedule};
pub use types::{
    clip_fingerprint, normalize_id, ClipCutRequest, ClipCutResult, ClipJobMetadata, ClipMode,
    ClipRecord, ClipSearchParams, ClipSegment, ClipWindow, OnIcePlayer, PlayerRef, Timeframe,
};
