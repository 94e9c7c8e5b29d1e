//! In-memory model of the on-device catalog (the iTunesDB-equivalent
//! binary database maintained by the device library).
//!
//! The actual binary (de)serialization is provided by an external device
//! library; this module models the shape that library hands back and
//! forth, plus the invariants the orchestrator and verifier depend on
//! (a master playlist that contains every track, stable track ids,
//! ordered named playlists).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coarse media kind, mirrors the device library's own classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MediaType {
    #[default]
    Audio,
    Movie,
    Podcast,
    Audiobook,
}

/// A single catalog entry. Denormalized (no separate artist/album tables)
/// because the underlying device format stores tracks this way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub mediatype: MediaType,

    /// Path on the device filesystem, device-mangled form as stored by
    /// the library (e.g. `:iPod_Control:Music:F00:track.mp3`).
    pub ipod_path: String,

    pub title: String,
    pub album: String,
    pub artist: String,
    pub album_artist: String,
    pub composer: Option<String>,
    pub genre: Option<String>,
    pub filetype: Option<String>,
    pub comment: Option<String>,

    pub size: u64,
    /// Track length in milliseconds.
    pub tracklen: u32,
    pub bitrate: u32,
    pub samplerate: u32,
    pub track_nr: u32,
    pub year: u32,

    pub time_added: i64,
    pub time_modified: i64,

    /// 0-5 star rating, stored as rating * RATING_STEP on the real
    /// device; kept as the plain 0-5 value here.
    pub rating: u8,
    pub playcount: u32,

    /// Hex-encoded SHA-256 fingerprint of the selected audio stream, if
    /// one has been computed for this track.
    pub fingerprint: Option<String>,
    /// DJB2 hash of `fingerprint`'s hex text, stored alongside it for a
    /// cheap pre-comparison before recomputing/reading the full digest.
    pub fingerprint_cksum: Option<u32>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: 0,
            mediatype: MediaType::default(),
            ipod_path: String::new(),
            title: String::new(),
            album: String::new(),
            artist: String::new(),
            album_artist: String::new(),
            composer: None,
            genre: None,
            filetype: None,
            comment: None,
            size: 0,
            tracklen: 0,
            bitrate: 0,
            samplerate: 0,
            track_nr: 0,
            year: 0,
            time_added: 0,
            time_modified: 0,
            rating: 0,
            playcount: 0,
            fingerprint: None,
            fingerprint_cksum: None,
        }
    }
}

impl Track {
    /// True when title, album and artist are all present and non-empty;
    /// the condition required to participate in the track-key index.
    pub fn has_complete_key(&self) -> bool {
        !self.title.trim().is_empty()
            && !self.album.trim().is_empty()
            && !self.artist.trim().is_empty()
    }
}

/// An ordered, named collection of track ids. The device format allows a
/// track to appear in several playlists, and the same track id more than
/// once within a single playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub is_master: bool,
    pub track_ids: Vec<u64>,
}

/// The in-memory, mutable view of a device's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub tracks: HashMap<u64, Track>,
    pub playlists: Vec<Playlist>,
    next_id: u64,

    #[serde(skip)]
    path: PathBuf,
}

pub const MASTER_PLAYLIST_NAME: &str = "iPod";

impl Catalog {
    /// Build a fresh, empty catalog (as if parsing a brand new device).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            tracks: HashMap::new(),
            playlists: vec![Playlist {
                name: MASTER_PLAYLIST_NAME.to_string(),
                is_master: true,
                track_ids: Vec::new(),
            }],
            next_id: 1,
            path: path.into(),
        }
    }

    /// Parse a catalog from the device's database file. Stands in for the
    /// external library's `itdb_parse` entry point.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new(path));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::CatalogWriteFailure(format!("reading {}: {e}", path.display())))?;
        let mut catalog: Catalog = serde_json::from_str(&text)
            .map_err(|e| Error::CatalogWriteFailure(format!("parsing {}: {e}", path.display())))?;
        catalog.path = path.to_path_buf();
        Ok(catalog)
    }

    /// Persist the catalog back to its backing file. Stands in for
    /// `itdb_write`; callers are responsible for the rollback-on-failure
    /// semantics around staged device files (see `ingest`).
    pub fn write(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::CatalogWriteFailure(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|e| Error::CatalogWriteFailure(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| Error::CatalogWriteFailure(e.to_string()))?;
        Ok(())
    }

    pub fn master_playlist(&self) -> &Playlist {
        self.playlists.iter().find(|p| p.is_master).expect("catalog always has a master playlist")
    }

    pub fn master_playlist_mut(&mut self) -> &mut Playlist {
        self.playlists.iter_mut().find(|p| p.is_master).expect("catalog always has a master playlist")
    }

    pub fn playlist_by_name(&self, name: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.name == name)
    }

    pub fn playlist_by_name_mut(&mut self, name: &str) -> Option<&mut Playlist> {
        self.playlists.iter_mut().find(|p| p.name == name)
    }

    /// Remove a named, non-master playlist entirely (used before
    /// recreating it, e.g. the recent-listening playlist).
    pub fn remove_playlist(&mut self, name: &str) {
        self.playlists.retain(|p| p.is_master || p.name != name);
    }

    /// Remove every non-master playlist whose name starts with `prefix`.
    /// Used to clear a whole family of generated playlists (e.g. all five
    /// "Recent: ..." windows) before regenerating them.
    pub fn remove_playlists_with_prefix(&mut self, prefix: &str) {
        self.playlists.retain(|p| p.is_master || !p.name.starts_with(prefix));
    }

    /// Create (or replace) a named playlist with the given track ids, in
    /// order. Refuses to touch the master playlist.
    pub fn set_playlist(&mut self, name: &str, track_ids: Vec<u64>) {
        self.remove_playlist(name);
        if track_ids.is_empty() {
            return;
        }
        self.playlists.push(Playlist {
            name: name.to_string(),
            is_master: false,
            track_ids,
        });
    }

    /// Add a track to the catalog and to the master playlist, assigning
    /// it a fresh id.
    pub fn add_track(&mut self, mut track: Track) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        track.id = id;
        self.master_playlist_mut().track_ids.push(id);
        self.tracks.insert(id, track);
        id
    }

    /// Remove a track from every playlist (including master) and from
    /// the track table itself.
    pub fn remove_track(&mut self, id: u64) -> Option<Track> {
        for playlist in &mut self.playlists {
            playlist.track_ids.retain(|&t| t != id);
        }
        self.tracks.remove(&id)
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track(title: &str) -> Track {
        Track {
            title: title.to_string(),
            album: "Album".to_string(),
            artist: "Artist".to_string(),
            filetype: Some("mp3".to_string()),
            size: 1000,
            tracklen: 10_000,
            bitrate: 192,
            samplerate: 44100,
            track_nr: 1,
            year: 2020,
            ..Track::default()
        }
    }

    #[test]
    fn new_catalog_has_empty_master_playlist() {
        let cat = Catalog::new("/tmp/nope.json");
        assert_eq!(cat.playlists.len(), 1);
        assert!(cat.master_playlist().is_master);
        assert!(cat.master_playlist().track_ids.is_empty());
    }

    #[test]
    fn add_track_appears_in_master() {
        let mut cat = Catalog::new("/tmp/nope.json");
        let id = cat.add_track(sample_track("Song"));
        assert!(cat.master_playlist().track_ids.contains(&id));
        assert_eq!(cat.track(id).unwrap().title, "Song");
    }

    #[test]
    fn remove_track_clears_all_playlists() {
        let mut cat = Catalog::new("/tmp/nope.json");
        let id = cat.add_track(sample_track("Song"));
        cat.set_playlist("Recent", vec![id]);
        cat.remove_track(id);
        assert!(!cat.master_playlist().track_ids.contains(&id));
        assert!(cat.playlist_by_name("Recent").is_none());
        assert!(cat.track(id).is_none());
    }

    #[test]
    fn set_playlist_replaces_existing() {
        let mut cat = Catalog::new("/tmp/nope.json");
        let a = cat.add_track(sample_track("A"));
        let b = cat.add_track(sample_track("B"));
        cat.set_playlist("Recent", vec![a]);
        cat.set_playlist("Recent", vec![b]);
        assert_eq!(cat.playlist_by_name("Recent").unwrap().track_ids, vec![b]);
    }

    #[test]
    fn parse_missing_file_yields_empty_catalog() {
        let cat = Catalog::parse("/nonexistent/path/itunesdb.json").unwrap();
        assert!(cat.tracks.is_empty());
    }

    #[test]
    fn write_then_parse_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itunesdb.json");
        let mut cat = Catalog::new(&path);
        cat.add_track(sample_track("Song"));
        cat.write().unwrap();

        let reloaded = Catalog::parse(&path).unwrap();
        assert_eq!(reloaded.tracks.len(), 1);
    }

    #[test]
    fn track_key_requires_all_three_fields() {
        let mut t = sample_track("Song");
        assert!(t.has_complete_key());
        t.album = String::new();
        assert!(!t.has_complete_key());
    }
}
