//! Track key index: a multimap keyed by (title, album, artist), used to
//! find prior versions of a track to evict when `--replace` is set.
//!
//! Only tracks with a complete key (all three fields present and
//! non-empty) are indexed; see [`crate::catalog::Track::has_complete_key`].

use std::collections::HashMap;

use crate::catalog::{Catalog, Track};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub title: String,
    pub album: String,
    pub artist: String,
}

impl TrackKey {
    pub fn of(track: &Track) -> Option<Self> {
        if !track.has_complete_key() {
            return None;
        }
        Some(Self {
            title: track.title.to_lowercase(),
            album: track.album.to_lowercase(),
            artist: track.artist.to_lowercase(),
        })
    }
}

#[derive(Debug, Default)]
pub struct TrackKeyIndex {
    map: HashMap<TrackKey, Vec<u64>>,
}

impl TrackKeyIndex {
    pub fn build(catalog: &Catalog) -> Self {
        let mut index = Self::default();
        for track in catalog.tracks.values() {
            index.insert(track);
        }
        index
    }

    pub fn insert(&mut self, track: &Track) {
        if let Some(key) = TrackKey::of(track) {
            self.map.entry(key).or_default().push(track.id);
        }
    }

    pub fn remove(&mut self, track: &Track) {
        if let Some(key) = TrackKey::of(track) {
            if let Some(ids) = self.map.get_mut(&key) {
                ids.retain(|&id| id != track.id);
            }
        }
    }

    /// All existing track ids sharing this (title, album, artist) key,
    /// i.e. candidates for eviction when replacing.
    pub fn matches(&self, track: &Track) -> &[u64] {
        TrackKey::of(track)
            .and_then(|key| self.map.get(&key))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, album: &str, artist: &str) -> Track {
        Track {
            title: title.into(),
            album: album.into(),
            artist: artist.into(),
            ..Track::default()
        }
    }

    #[test]
    fn incomplete_key_is_not_indexed() {
        let mut t = track("Song", "", "Artist");
        t.id = 1;
        let mut index = TrackKeyIndex::default();
        index.insert(&t);
        assert!(index.matches(&t).is_empty());
    }

    #[test]
    fn matching_key_is_case_insensitive() {
        let mut existing = track("Song", "Album", "Artist");
        existing.id = 1;
        let mut index = TrackKeyIndex::default();
        index.insert(&existing);

        let mut incoming = track("SONG", "album", "Artist");
        incoming.id = 2;
        assert_eq!(index.matches(&incoming), &[1]);
    }

    #[test]
    fn remove_clears_entry() {
        let mut existing = track("Song", "Album", "Artist");
        existing.id = 1;
        let mut index = TrackKeyIndex::default();
        index.insert(&existing);
        index.remove(&existing);
        assert!(index.matches(&existing).is_empty());
    }
}
