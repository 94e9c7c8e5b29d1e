//! Ingest Orchestrator: the per-file worker-pool pipeline that probes,
//! optionally transcodes, fingerprints, and commits each input file onto
//! the device catalog.
//!
//! Two separate mutexes guard disjoint state, matching the original
//! tool's split locking: `commit` guards the catalog, the device-copy
//! rollback list, and the recent-playlist cursor; `failed` guards only
//! the shared failures list. Workers never need both at once except
//! during the commit section itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{Catalog, MediaType, Track};
use crate::device_path;
use crate::duplicate_index::DuplicateIndex;
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::probe::{self, DeviceGeneration, MediaInfo};
use crate::recent_playlist;
use crate::track_key_index::TrackKeyIndex;
use crate::transcode::{self, Encoder, TranscodeRequest};

/// A track replaced (evicted) by `--replace` because it shared a
/// (title, album, artist) key with an incoming track.
#[derive(Debug, Clone)]
pub struct Replaced {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub device: DeviceGeneration,
    pub max_threads: usize,
    pub force: bool,
    pub checksum: bool,
    pub sanitize: bool,
    pub replace: bool,
    pub recent_limit: usize,
    pub recent_playlist_name: String,
    pub transcode: Option<TranscodeRequest>,
    /// Root of the mounted device filesystem; `ipod_path` is stored
    /// mangled and relative to this, not as an absolute host path.
    pub device_root: PathBuf,
    pub device_music_dir: PathBuf,
    pub write_every: u32,
    /// If the configured transcode encoder isn't available on this
    /// host's ffmpeg build, silently retry with mp3 instead of failing
    /// the item.
    pub encoder_fallback: bool,
    /// Force every ingested track's `mediatype` to this value instead of
    /// letting the probe's has_video flag decide.
    pub media_type_override: Option<MediaType>,
    /// Spoof `time_added` instead of using the current time (ISO-8601
    /// input, parsed by the caller into a Unix timestamp).
    pub time_added_override: Option<i64>,
}

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub music: u64,
    pub video: u64,
    pub other: u64,
    pub bytes: u64,
    pub added: u64,
}

fn stats_bucket(mediatype: MediaType) -> fn(&mut Stats) {
    match mediatype {
        MediaType::Audio => |s| s.music += 1,
        MediaType::Movie => |s| s.video += 1,
        MediaType::Podcast | MediaType::Audiobook => |s| s.other += 1,
    }
}

struct CommitState {
    catalog: Catalog,
    duplicate_index: DuplicateIndex,
    track_key_index: TrackKeyIndex,
    pending_device_paths: Vec<PathBuf>,
    stats: Stats,
    since_last_write: u32,
}

pub struct IngestRun {
    options: IngestOptions,
    commit: Mutex<CommitState>,
    failed: Mutex<Vec<Failure>>,
    replaced: Mutex<Vec<Replaced>>,
    cancel: Arc<AtomicBool>,
    sequence: std::sync::atomic::AtomicU64,
}

impl IngestRun {
    pub fn new(catalog: Catalog, options: IngestOptions, cancel: Arc<AtomicBool>) -> Self {
        let duplicate_index = DuplicateIndex::build(&catalog);
        let track_key_index = TrackKeyIndex::build(&catalog);
        Self {
            options,
            commit: Mutex::new(CommitState {
                catalog,
                duplicate_index,
                track_key_index,
                pending_device_paths: Vec::new(),
                stats: Stats::default(),
                since_last_write: 0,
            }),
            failed: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            cancel,
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Run the pipeline over all `files`, using at most `max_threads`
    /// concurrent workers. Returns the final stats, failures and
    /// replacements after a final catalog write.
    pub fn run(&self, files: &[PathBuf]) -> Result<(Stats, Vec<Failure>, Vec<Replaced>)> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_threads.max(1))
            .build()
            .map_err(|e| Error::config(e.to_string()))?;

        pool.install(|| {
            use rayon::prelude::*;
            files.par_iter().for_each(|path| {
                if self.cancel.load(Ordering::SeqCst) {
                    return;
                }
                self.process_one(path);
            });
        });

        let added_any = {
            let state = self.commit.lock().unwrap();
            state.stats.added > 0
        };
        if added_any {
            self.rebuild_recent_playlist();
        }

        self.write_catalog_final()?;

        let stats = self.commit.lock().unwrap().stats.clone();
        let failed = self.failed.lock().unwrap().clone();
        let replaced = self.replaced.lock().unwrap().clone();
        Ok((stats, failed, replaced))
    }

    fn process_one(&self, path: &Path) {
        if !path.exists() {
            self.push_failure(path, "file not found");
            return;
        }

        let info = match probe::scan(path, self.options.device) {
            Ok(info) => info,
            Err(e) => {
                self.push_failure(path, &e.to_string());
                return;
            }
        };

        if self.cancel.load(Ordering::SeqCst) {
            return;
        }

        let staged = match self.stage_file(path, &info) {
            Ok(staged) => staged,
            Err(e) => {
                self.push_failure(path, &e.to_string());
                return;
            }
        };

        let fp = if self.options.checksum {
            fingerprint::fingerprint_file(&staged).ok()
        } else {
            None
        };

        if self.cancel.load(Ordering::SeqCst) {
            return;
        }

        self.commit_section(path, &staged, info, fp);
    }

    /// Copy (or transcode) the source into a staged, not-yet-device path.
    /// Returns the path that will be copied onto the device.
    fn stage_file(&self, path: &Path, info: &MediaInfo) -> Result<PathBuf> {
        if info.supported_ipod_fmt {
            return Ok(path.to_path_buf());
        }
        if info.has_video {
            if self.options.force {
                return Ok(path.to_path_buf());
            }
            return Err(Error::UnsupportedVideo {
                path: path.to_path_buf(),
                message: "video format not supported on target device".into(),
            });
        }

        let Some(request) = &self.options.transcode else {
            return Err(Error::UnsupportedDevice(format!(
                "{} needs transcoding and no encoder was configured",
                path.display()
            )));
        };

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        if self.options.encoder_fallback
            && request.encoder != Encoder::Mp3
            && !transcode::encoder_available(request.encoder)
        {
            let mut fallback = request.clone();
            fallback.encoder = Encoder::Mp3;
            tracing::warn!(
                encoder = request.encoder.ffmpeg_name(),
                "encoder unavailable, falling back to mp3"
            );
            return transcode::transcode(path, &fallback, sequence);
        }

        transcode::transcode(path, request, sequence)
    }

    /// Duplicate check, catalog insert, device copy, stats, recent-list
    /// insertion, replace-by-key eviction, and periodic checkpoint — all
    /// serialized under the commit mutex.
    fn commit_section(&self, original_path: &Path, staged_path: &Path, info: MediaInfo, fp: Option<fingerprint::Fingerprint>) {
        let mut state = self.commit.lock().unwrap();

        let mut track = build_track(&info, fp.as_ref(), &self.options);

        if let Some(fp) = &fp {
            if let Some(existing) = state.duplicate_index.find_duplicate(&state.catalog, &track, &fp.hex) {
                drop(state);
                self.push_failure(
                    original_path,
                    &Error::DuplicateDetected(format!("matches existing track id {existing}")).to_string(),
                );
                return;
            }
        }

        let device_file_path = self.options.device_music_dir.join(
            staged_path.file_name().unwrap_or_default(),
        );
        if let Err(e) = std::fs::copy(staged_path, &device_file_path) {
            drop(state);
            self.push_failure(original_path, &Error::copy(original_path, e.to_string()).to_string());
            return;
        }

        let relative = device_file_path.strip_prefix(&self.options.device_root).unwrap_or(&device_file_path);
        track.ipod_path = device_path::mangle(relative);
        let id = state.catalog.add_track(track.clone());
        track.id = id;

        state.duplicate_index.insert(&track);
        state.track_key_index.insert(&track);
        state.pending_device_paths.push(device_file_path.clone());

        stats_bucket(track.mediatype)(&mut state.stats);
        state.stats.bytes += track.size;
        state.stats.added += 1;

        if self.options.replace {
            self.evict_replaced(&mut state, &track, &device_file_path);
        }

        state.since_last_write += 1;
        if self.options.write_every > 0 && state.since_last_write >= self.options.write_every {
            state.since_last_write = 0;
            if let Err(_e) = state.catalog.write() {
                drop(state);
                self.rollback_pending();
                return;
            }
            state.pending_device_paths.clear();
        }
    }

    fn evict_replaced(&self, state: &mut CommitState, incoming: &Track, new_device_path: &Path) {
        let matches: Vec<u64> = state
            .track_key_index
            .matches(incoming)
            .iter()
            .copied()
            .filter(|&id| id != incoming.id)
            .collect();

        for old_id in matches {
            let Some(old_track) = state.catalog.track(old_id).cloned() else { continue };
            let old_device_path = device_path::resolve(&self.options.device_root, &old_track.ipod_path);

            state.catalog.remove_track(old_id);
            state.track_key_index.remove(&old_track);
            let _ = std::fs::remove_file(&old_device_path);

            self.replaced.lock().unwrap().push(Replaced {
                old_path: old_device_path,
                new_path: new_device_path.to_path_buf(),
                title: incoming.title.clone(),
                artist: incoming.artist.clone(),
                album: incoming.album.clone(),
            });
        }
    }

    fn rebuild_recent_playlist(&self) {
        let mut state = self.commit.lock().unwrap();
        let windows = recent_playlist::build_recent_playlist(&state.catalog, self.options.recent_limit, None);
        recent_playlist::write_recent_playlist(&mut state.catalog, &self.options.recent_playlist_name, windows);
    }

    fn write_catalog_final(&self) -> Result<()> {
        let mut state = self.commit.lock().unwrap();
        match state.catalog.write() {
            Ok(()) => {
                state.pending_device_paths.clear();
                Ok(())
            }
            Err(e) => {
                drop(state);
                self.rollback_pending();
                Err(e)
            }
        }
    }

    /// On a fatal catalog write failure, unlink every staged device path
    /// added since the last successful checkpoint; there is no point
    /// leaving orphaned files the catalog no longer describes.
    fn rollback_pending(&self) {
        let mut state = self.commit.lock().unwrap();
        for path in state.pending_device_paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }

    fn push_failure(&self, path: &Path, message: &str) {
        self.failed.lock().unwrap().push(Failure {
            path: path.to_path_buf(),
            message: message.to_string(),
        });
    }
}

/// Build a catalog track for a filesystem file the verifier is adding
/// back (Phase 2, `OrphanMode::AddBack`). The caller is responsible for
/// setting `ipod_path` once the on-device path is known.
pub fn build_track_for_add_back(info: &MediaInfo) -> Track {
    build_track_from_info(info, None, None, None)
}

fn build_track(info: &MediaInfo, fp: Option<&fingerprint::Fingerprint>, options: &IngestOptions) -> Track {
    build_track_from_info(info, fp, options.media_type_override, options.time_added_override)
}

fn build_track_from_info(
    info: &MediaInfo,
    fp: Option<&fingerprint::Fingerprint>,
    media_type_override: Option<MediaType>,
    time_added_override: Option<i64>,
) -> Track {
    let now = time_added_override.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let mediatype = media_type_override
        .unwrap_or_else(|| if info.has_video { MediaType::Movie } else { MediaType::Audio });
    Track {
        id: 0,
        mediatype,
        ipod_path: String::new(),
        title: info.tags.title.clone().unwrap_or_default(),
        album: info.tags.album.clone().unwrap_or_default(),
        artist: info.tags.artist.clone().unwrap_or_default(),
        album_artist: info.tags.album_artist.clone().unwrap_or_default(),
        composer: info.tags.composer.clone(),
        genre: info.tags.genre.clone(),
        filetype: Some(info.description.clone()),
        comment: info.tags.comment.clone(),
        size: info.file_size,
        tracklen: info.audio.song_length_ms,
        bitrate: info.audio.bitrate_kbps,
        samplerate: info.audio.samplerate,
        track_nr: info.tags.track.unwrap_or(0),
        year: info.tags.year.unwrap_or(0),
        time_added: now,
        time_modified: now,
        rating: 0,
        playcount: 0,
        fingerprint: fp.map(|f| f.hex.clone()),
        fingerprint_cksum: fp.map(|f| f.cksum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_track_defaults_empty_tags_to_empty_strings() {
        let info = MediaInfo {
            path: "/x.mp3".into(),
            file_size: 10,
            container_format: "mp3".into(),
            description: "mp3 audio".into(),
            has_audio: true,
            has_video: false,
            supported_ipod_fmt: true,
            audio: Default::default(),
            video: Default::default(),
            tags: Default::default(),
        };
        let track = build_track_from_info(&info, None, None, None);
        assert_eq!(track.title, "");
        assert_eq!(track.mediatype, MediaType::Audio);
    }

    #[test]
    fn media_type_override_forces_classification() {
        let info = MediaInfo {
            path: "/x.mp3".into(),
            file_size: 10,
            container_format: "mp3".into(),
            description: "mp3 audio".into(),
            has_audio: true,
            has_video: false,
            supported_ipod_fmt: true,
            audio: Default::default(),
            video: Default::default(),
            tags: Default::default(),
        };
        let track = build_track_from_info(&info, None, Some(MediaType::Podcast), None);
        assert_eq!(track.mediatype, MediaType::Podcast);
    }

    #[test]
    fn time_added_override_is_honored() {
        let info = MediaInfo {
            path: "/x.mp3".into(),
            file_size: 10,
            container_format: "mp3".into(),
            description: "mp3 audio".into(),
            has_audio: true,
            has_video: false,
            supported_ipod_fmt: true,
            audio: Default::default(),
            video: Default::default(),
            tags: Default::default(),
        };
        let track = build_track_from_info(&info, None, None, Some(123_456));
        assert_eq!(track.time_added, 123_456);
        assert_eq!(track.time_modified, 123_456);
    }
}
