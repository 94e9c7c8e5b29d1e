//! Verifier: three-phase reconciliation between the catalog and the
//! device filesystem, plus optional fingerprint (re)generation.
//!
//! Phase 1 drops catalog entries whose backing file is gone. Phase 2
//! reconciles filesystem files the catalog doesn't know about, per the
//! caller's chosen mode (add back / treat as stale and delete / report
//! as an orphan and leave alone). Phase 3 regenerates fingerprints,
//! optionally for every track, using the same worker-pool-with-periodic-
//! checkpoint shape as the ingest orchestrator.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use walkdir::WalkDir;

use crate::catalog::{Catalog, MediaType};
use crate::device_path;
use crate::error::Result;
use crate::fingerprint;
use crate::probe::{self, DeviceGeneration};

/// What Phase 2 should do with a filesystem file the catalog has no
/// record of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanMode {
    /// Probe it and add it to the catalog.
    AddBack,
    /// Delete the file; the catalog is the source of truth.
    Remove,
    /// Leave the file alone, just report it.
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    None,
    /// Fill in fingerprints only where missing.
    Missing,
    /// Recompute every fingerprint, even ones already present.
    RegenerateAll,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub device_root: PathBuf,
    pub device: DeviceGeneration,
    pub orphan_mode: OrphanMode,
    pub checksum_mode: ChecksumMode,
    pub checksum_threads: usize,
    pub sync_limit: u32,
}

#[derive(Debug, Default, Clone)]
pub struct VerifyStats {
    pub dangling_removed: u64,
    pub added_back: u64,
    pub orphaned: u64,
    pub removed_bytes: u64,
    pub added_bytes: u64,
    pub orphan_bytes: u64,
    pub checksummed: u64,
}

/// Run all three phases and return summary stats. Writes the catalog
/// back whenever Phase 1 or 2 changed it, and again at the end if Phase
/// 3 touched anything.
pub fn verify(catalog: &mut Catalog, options: &VerifyOptions) -> Result<VerifyStats> {
    let mut stats = VerifyStats::default();

    let phase1_changed = phase1_drop_dangling(catalog, options, &mut stats);
    let phase2_changed = phase2_reconcile_filesystem(catalog, options, &mut stats);

    if phase1_changed || phase2_changed {
        catalog.write()?;
    }

    if options.checksum_mode != ChecksumMode::None {
        phase3_regenerate_fingerprints(catalog, options, &mut stats)?;
    }

    Ok(stats)
}

fn phase1_drop_dangling(catalog: &mut Catalog, options: &VerifyOptions, stats: &mut VerifyStats) -> bool {
    let dangling: Vec<u64> = catalog
        .master_playlist()
        .track_ids
        .iter()
        .copied()
        .filter(|&id| {
            catalog
                .track(id)
                .map(|t| !device_path::resolve(&options.device_root, &t.ipod_path).exists())
                .unwrap_or(false)
        })
        .collect();

    for id in &dangling {
        if let Some(track) = catalog.remove_track(*id) {
            stats.dangling_removed += 1;
            stats.removed_bytes += track.size;
        }
    }

    !dangling.is_empty()
}

fn phase2_reconcile_filesystem(catalog: &mut Catalog, options: &VerifyOptions, stats: &mut VerifyStats) -> bool {
    let known_paths: HashSet<PathBuf> = catalog
        .tracks
        .values()
        .map(|t| device_path::resolve(&options.device_root, &t.ipod_path))
        .collect();

    let mut changed = false;

    for entry in WalkDir::new(&options.device_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        if known_paths.contains(&path) {
            continue;
        }

        match options.orphan_mode {
            OrphanMode::Report => {
                stats.orphaned += 1;
                stats.orphan_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
            OrphanMode::Remove => {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if std::fs::remove_file(&path).is_ok() {
                    stats.removed_bytes += size;
                }
            }
            OrphanMode::AddBack => {
                if let Ok(info) = probe::scan(&path, options.device) {
                    if info.supported_ipod_fmt {
                        let mut track = crate::ingest::build_track_for_add_back(&info);
                        let relative = path.strip_prefix(&options.device_root).unwrap_or(&path);
                        track.ipod_path = device_path::mangle(relative);
                        stats.added_bytes += track.size;
                        catalog.add_track(track);
                        stats.added_back += 1;
                        changed = true;
                    }
                }
            }
        }
    }

    changed
}

fn phase3_regenerate_fingerprints(catalog: &mut Catalog, options: &VerifyOptions, stats: &mut VerifyStats) -> Result<()> {
    let targets: Vec<u64> = catalog
        .master_playlist()
        .track_ids
        .iter()
        .copied()
        .filter(|&id| {
            catalog
                .track(id)
                .map(|t| {
                    t.mediatype == MediaType::Audio
                        && (options.checksum_mode == ChecksumMode::RegenerateAll || t.fingerprint.is_none())
                })
                .unwrap_or(false)
        })
        .collect();

    if targets.is_empty() {
        return Ok(());
    }

    let catalog_mutex = Mutex::new(std::mem::replace(catalog, Catalog::new("")));
    let checksummed = AtomicU32::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.checksum_threads.max(1))
        .build()
        .map_err(|e| crate::error::Error::config(e.to_string()))?;

    pool.install(|| {
        use rayon::prelude::*;
        targets.par_iter().for_each(|&id| {
            let path = {
                let guard = catalog_mutex.lock().unwrap();
                guard.track(id).map(|t| device_path::resolve(&options.device_root, &t.ipod_path))
            };
            let Some(path) = path else { return };
            let Ok(fp) = fingerprint::fingerprint_file(&path) else { return };

            let mut guard = catalog_mutex.lock().unwrap();
            if let Some(track) = guard.tracks.get_mut(&id) {
                track.fingerprint = Some(fp.hex);
                track.fingerprint_cksum = Some(fp.cksum);
            }
            let count = checksummed.fetch_add(1, Ordering::SeqCst) + 1;
            if options.sync_limit > 0 && count % options.sync_limit == 0 {
                let _ = guard.write();
            }
        });
    });

    *catalog = catalog_mutex.into_inner().unwrap();
    stats.checksummed = checksummed.load(Ordering::SeqCst) as u64;

    if stats.checksummed > 0 {
        catalog.write()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> VerifyOptions {
        VerifyOptions {
            device_root: PathBuf::from("/nonexistent"),
            device: DeviceGeneration::AudioOnly,
            orphan_mode: OrphanMode::Report,
            checksum_mode: ChecksumMode::None,
            checksum_threads: 1,
            sync_limit: 0,
        }
    }

    #[test]
    fn phase1_drops_tracks_whose_file_is_gone() {
        use crate::catalog::Track;
        let mut catalog = Catalog::new("/tmp/x.json");
        let id = catalog.add_track(Track {
            ipod_path: ":path.mp3".into(),
            title: "T".into(),
            album: "A".into(),
            artist: "Ar".into(),
            size: 10,
            ..Track::default()
        });
        let mut stats = VerifyStats::default();
        let changed = phase1_drop_dangling(&mut catalog, &test_options(), &mut stats);
        assert!(changed);
        assert_eq!(stats.dangling_removed, 1);
        assert!(catalog.track(id).is_none());
    }
}
