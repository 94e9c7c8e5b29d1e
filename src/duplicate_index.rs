//! Three-tier duplicate index over the catalog's tracks.
//!
//! Tiers get progressively more expensive to compute and more
//! discriminating: `low` is purely structural (cheap to derive from a
//! probe alone), `med` adds text hashes, `high` adds the album hash. A
//! containment query narrows via `high` and then confirms with a
//! recomputed fingerprint, since two different recordings can
//! legitimately collide on every tier but the audio stream itself.

use std::collections::HashMap;

use crate::catalog::{Catalog, Track};
use crate::fingerprint::djb2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LowKey {
    pub size: u64,
    pub tracklen: u32,
    pub bitrate: u32,
    pub samplerate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MedKey {
    pub low: LowKey,
    pub artist_hash: u32,
    pub title_hash: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HighKey {
    pub med: MedKey,
    pub album_hash: u32,
}

fn low_key(track: &Track) -> LowKey {
    LowKey {
        size: track.size,
        tracklen: track.tracklen,
        bitrate: track.bitrate,
        samplerate: track.samplerate,
    }
}

fn med_key(track: &Track) -> MedKey {
    MedKey {
        low: low_key(track),
        artist_hash: djb2(track.artist.to_lowercase().as_bytes()),
        title_hash: djb2(track.title.to_lowercase().as_bytes()),
    }
}

fn high_key(track: &Track) -> HighKey {
    HighKey {
        med: med_key(track),
        album_hash: djb2(track.album.to_lowercase().as_bytes()),
    }
}

/// Index over all tracks currently in a catalog, rebuilt at the start of
/// a run (ingest or verify) and updated incrementally as tracks are
/// added.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    low: HashMap<LowKey, Vec<u64>>,
    med: HashMap<MedKey, Vec<u64>>,
    high: HashMap<HighKey, Vec<u64>>,
}

impl DuplicateIndex {
    pub fn build(catalog: &Catalog) -> Self {
        let mut index = Self::default();
        for track in catalog.tracks.values() {
            index.insert(track);
        }
        index
    }

    pub fn insert(&mut self, track: &Track) {
        self.low.entry(low_key(track)).or_default().push(track.id);
        self.med.entry(med_key(track)).or_default().push(track.id);
        self.high.entry(high_key(track)).or_default().push(track.id);
    }

    /// Candidate track ids sharing this track's `high` bucket. Callers
    /// must confirm with a fingerprint comparison before treating any
    /// candidate as a true duplicate.
    pub fn candidates(&self, track: &Track) -> &[u64] {
        self.high.get(&high_key(track)).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the id of the first candidate whose stored fingerprint
    /// matches `fingerprint_hex`, confirming a true duplicate.
    pub fn find_duplicate(&self, catalog: &Catalog, track: &Track, fingerprint_hex: &str) -> Option<u64> {
        self.candidates(track).iter().copied().find(|&id| {
            catalog
                .track(id)
                .and_then(|t| t.fingerprint.as_deref())
                .map(|fp| fp == fingerprint_hex)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, album: &str, artist: &str, fp: Option<&str>) -> Track {
        Track {
            title: title.into(),
            album: album.into(),
            artist: artist.into(),
            size: 1000,
            tracklen: 10_000,
            bitrate: 192,
            samplerate: 44100,
            track_nr: 1,
            year: 2020,
            fingerprint: fp.map(str::to_string),
            ..Track::default()
        }
    }

    #[test]
    fn identical_tracks_share_all_tiers() {
        let a = track("Song", "Album", "Artist", None);
        let b = track("Song", "Album", "Artist", None);
        assert_eq!(low_key(&a), low_key(&b));
        assert_eq!(med_key(&a), med_key(&b));
        assert_eq!(high_key(&a), high_key(&b));
    }

    #[test]
    fn different_album_splits_high_not_med_not_low() {
        let a = track("Song", "Album A", "Artist", None);
        let b = track("Song", "Album B", "Artist", None);
        assert_eq!(low_key(&a), low_key(&b));
        assert_eq!(med_key(&a), med_key(&b));
        assert_ne!(high_key(&a), high_key(&b));
    }

    #[test]
    fn find_duplicate_requires_fingerprint_match() {
        let mut catalog = Catalog::new("/tmp/x.json");
        let mut existing = track("Song", "Album", "Artist", Some("abc123"));
        existing.id = catalog.add_track(existing.clone());
        let mut index = DuplicateIndex::default();
        index.insert(catalog.track(existing.id).unwrap());

        let incoming = track("Song", "Album", "Artist", None);
        assert_eq!(index.find_duplicate(&catalog, &incoming, "abc123"), Some(existing.id));
        assert_eq!(index.find_duplicate(&catalog, &incoming, "different"), None);
    }
}
