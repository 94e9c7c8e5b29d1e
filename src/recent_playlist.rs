//! Recent Playlist Builder: groups tracks added "recently" into five
//! fixed UTC windows (today, last week, last month, last 3 months, last
//! 6 months) and allocates them album-by-album, newest first, against a
//! shared track budget.
//!
//! Each nonempty window becomes its own playlist (`"<base>: <suffix>"`),
//! mirroring `gpod_recent_create_playlists`: a window with no qualifying
//! album contributes no playlist at all rather than an empty one.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::catalog::{Catalog, MediaType};

pub const DEFAULT_RECENT_PLAYLIST_NAME: &str = "Recent";

#[derive(Debug, Clone, Copy)]
struct Window {
    suffix: &'static str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl Window {
    fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.from && t <= self.to
    }
}

fn day_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn day_end(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_hms_opt(23, 59, 59).unwrap().and_utc()
}

/// Build the five fixed windows relative to `now`, exactly mirroring the
/// boundary construction of the original tool: each window's `to` abuts
/// the previous window's `from` minus one day.
fn windows(now: DateTime<Utc>) -> Vec<Window> {
    let today_from = day_start(now);
    let today_to = day_end(now);

    let wk_from = day_start(today_from - Duration::days(1) - Duration::weeks(1));
    let wk_to = day_end(today_from - Duration::days(1));

    let mth_from = day_start(subtract_months(today_from, 1));
    let mth_to = day_end(wk_from - Duration::days(1));

    let three_mth_from = day_start(subtract_months(today_from, 3));
    let three_mth_to = day_end(mth_from - Duration::days(1));

    let six_mth_from = day_start(subtract_months(today_from, 6));
    let six_mth_to = day_end(three_mth_from - Duration::days(1));

    vec![
        Window { suffix: "0d", from: today_from, to: today_to },
        Window { suffix: "last wk", from: wk_from, to: wk_to },
        Window { suffix: "last mth", from: mth_from, to: mth_to },
        Window { suffix: "last 3mth", from: three_mth_from, to: three_mth_to },
        Window { suffix: "last 6mth", from: six_mth_from, to: six_mth_to },
    ]
}

fn subtract_months(t: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let mut year = t.year();
    let mut month = t.month() as i32 - months as i32;
    while month <= 0 {
        month += 12;
        year -= 1;
    }
    Utc.with_ymd_and_hms(year, month as u32, t.day().min(28), t.hour(), t.minute(), t.second())
        .single()
        .unwrap_or(t)
}

use chrono::Datelike;
use chrono::Timelike;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AlbumKey {
    album: String,
    artist: String,
}

/// Tolerance rule from the original implementation: compare by artist
/// alone when either side's album is absent, rather than refusing to
/// group the track at all.
impl AlbumKey {
    fn matches(&self, other: &AlbumKey) -> bool {
        if self.album.is_empty() || other.album.is_empty() {
            self.artist == other.artist
        } else {
            self.album == other.album && self.artist == other.artist
        }
    }
}

struct Album {
    key: AlbumKey,
    time_added: i64,
    track_ids: Vec<u64>,
}

/// Build the recent-listening playlists for a catalog: one `(suffix,
/// track_ids)` entry per nonempty window, ordered newest-window-first.
///
/// `now` pins "today"; pass `None` to use the maximum `time_added` over
/// the master playlist's audio tracks (mirrors `track_mostrecent`).
pub fn build_recent_playlist(
    catalog: &Catalog,
    limit: usize,
    now: Option<DateTime<Utc>>,
) -> Vec<(&'static str, Vec<u64>)> {
    if limit == 0 {
        return Vec::new();
    }

    let now = now.unwrap_or_else(|| most_recent_time_added(catalog));
    let wins = windows(now);

    // Linear scan with the tolerance rule, mirroring the original's
    // GSList-based album lookup (a hash map can't express "match on
    // artist alone when either side's album is blank").
    let mut albums: Vec<Album> = Vec::new();

    for &id in &catalog.master_playlist().track_ids {
        let Some(track) = catalog.track(id) else { continue };
        if track.mediatype != MediaType::Audio {
            continue;
        }
        let key = AlbumKey { album: track.album.clone(), artist: track.artist.clone() };

        if let Some(album) = albums.iter_mut().find(|a| a.key.matches(&key)) {
            album.track_ids.push(id);
            album.time_added = album.time_added.max(track.time_added);
        } else {
            albums.push(Album { key, time_added: track.time_added, track_ids: vec![id] });
        }
    }

    albums.sort_by(|a, b| b.time_added.cmp(&a.time_added));

    let mut available = limit;
    let mut per_window: Vec<Vec<u64>> = vec![Vec::new(); wins.len()];

    'albums: for album in &albums {
        if available == 0 {
            break;
        }
        let added_at = Utc.timestamp_opt(album.time_added, 0).single();
        let Some(added_at) = added_at else { continue };

        for (i, win) in wins.iter().enumerate() {
            if win.contains(added_at) {
                per_window[i].extend(album.track_ids.iter().copied());
                available -= 1;
                continue 'albums;
            }
        }
    }

    wins.iter()
        .zip(per_window)
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(win, ids)| (win.suffix, ids))
        .collect()
}

fn most_recent_time_added(catalog: &Catalog) -> DateTime<Utc> {
    let max = catalog
        .master_playlist()
        .track_ids
        .iter()
        .filter_map(|&id| catalog.track(id))
        .filter(|t| t.mediatype == MediaType::Audio)
        .map(|t| t.time_added)
        .max()
        .unwrap_or(0);
    Utc.timestamp_opt(max, 0).single().unwrap_or_else(Utc::now)
}

/// Overwrite the catalog's recent-listening playlists with the given
/// per-window track lists, one playlist per nonempty window
/// (`"<base_name>: <suffix>"`). Clears every existing playlist under
/// `base_name`'s prefix first, so a window that's gone empty since the
/// last rebuild doesn't leave a stale playlist behind.
pub fn write_recent_playlist(catalog: &mut Catalog, base_name: &str, windows: Vec<(&'static str, Vec<u64>)>) {
    let prefix = format!("{base_name}: ");
    catalog.remove_playlists_with_prefix(&prefix);
    for (suffix, track_ids) in windows {
        if track_ids.is_empty() {
            continue;
        }
        catalog.set_playlist(&format!("{prefix}{suffix}"), track_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Track;

    fn track(artist: &str, album: &str, time_added: i64) -> Track {
        Track {
            mediatype: MediaType::Audio,
            title: "T".into(),
            album: album.into(),
            artist: artist.into(),
            time_added,
            time_modified: time_added,
            ..Track::default()
        }
    }

    #[test]
    fn windows_are_contiguous_and_descending() {
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let wins = windows(now);
        assert_eq!(wins.len(), 5);
        for pair in wins.windows(2) {
            assert!(pair[0].from > pair[1].to);
        }
    }

    #[test]
    fn album_budget_consumes_one_slot_per_album_not_per_track() {
        let mut catalog = Catalog::new("/tmp/x.json");
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let today_ts = now.timestamp();
        catalog.add_track(track("Artist", "AlbumA", today_ts));
        catalog.add_track(track("Artist", "AlbumA", today_ts));
        catalog.add_track(track("Artist", "AlbumB", today_ts));

        let result = build_recent_playlist(&catalog, 1, Some(now));
        assert_eq!(result.len(), 1, "only the 0d window has anything in it");
        assert_eq!(result[0].0, "0d");
        assert_eq!(result[0].1.len(), 2, "whole first album included, budget then exhausted");
    }

    #[test]
    fn zero_limit_yields_no_playlist() {
        let mut catalog = Catalog::new("/tmp/x.json");
        catalog.add_track(track("A", "B", 0));
        assert!(build_recent_playlist(&catalog, 0, Some(Utc::now())).is_empty());
    }

    #[test]
    fn tracks_outside_all_windows_are_excluded() {
        let mut catalog = Catalog::new("/tmp/x.json");
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let ancient = now - Duration::days(400);
        catalog.add_track(track("A", "B", ancient.timestamp()));
        assert!(build_recent_playlist(&catalog, 10, Some(now)).is_empty());
    }

    #[test]
    fn distinct_windows_become_distinct_playlists() {
        let mut catalog = Catalog::new("/tmp/x.json");
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let today_ts = now.timestamp();
        let last_week_ts = (now - Duration::weeks(1) - Duration::days(2)).timestamp();
        catalog.add_track(track("Artist A", "Album A", today_ts));
        catalog.add_track(track("Artist B", "Album B", last_week_ts));

        let result = build_recent_playlist(&catalog, 10, Some(now));
        assert_eq!(result.len(), 2);

        let mut state = Catalog::new("/tmp/y.json");
        state.add_track(track("Artist A", "Album A", today_ts));
        state.add_track(track("Artist B", "Album B", last_week_ts));
        write_recent_playlist(&mut state, DEFAULT_RECENT_PLAYLIST_NAME, result);
        assert!(state.playlist_by_name("Recent: 0d").is_some());
        assert!(state.playlist_by_name("Recent: last wk").is_some());
    }
}
