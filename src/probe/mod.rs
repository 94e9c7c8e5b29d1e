//! Media Probe: container/codec inspection without decoding.
//!
//! Identifies the best audio (and, for video files, the best H.264
//! video) substream, extracts tags via a three-tier map (generic
//! container tags, then format-specific overrides), and decides whether
//! the target device generation can play the file natively.

use std::path::{Path, PathBuf};

use symphonia::core::codecs::CodecType;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;

use crate::error::{Error, Result};

/// The device generations this tool knows how to target. Mirrors the
/// small set of generations the device library actually distinguishes
/// for playback-capability purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceGeneration {
    /// Any audio-only device (classic, nano, shuffle, mini).
    AudioOnly,
    /// First or second generation video-capable iPod.
    Video1,
    Video2,
    /// Unknown/unspecified generation: treated conservatively.
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct AudioInfo {
    pub codec: Option<CodecType>,
    pub codec_name: String,
    pub bitrate_kbps: u32,
    pub samplerate: u32,
    pub channels: u32,
    pub song_length_ms: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub codec: Option<CodecType>,
    pub width: u32,
    pub height: u32,
    pub profile: Option<String>,
    pub bitrate_kbps: u32,
    pub fps: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub composer: Option<String>,
    pub grouping: Option<String>,
    pub track: Option<u32>,
    pub total_tracks: Option<u32>,
    pub disc: Option<u32>,
    pub total_discs: Option<u32>,
    pub year: Option<u32>,
    pub title_sort: Option<String>,
    pub artist_sort: Option<String>,
    pub album_sort: Option<String>,
    pub album_artist_sort: Option<String>,
}

/// Result of a probe: everything needed to decide support, build a
/// catalog `Track`, and decide whether transcoding is needed.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub container_format: String,
    pub description: String,

    pub has_audio: bool,
    pub has_video: bool,
    pub supported_ipod_fmt: bool,

    pub audio: AudioInfo,
    pub video: VideoInfo,
    pub tags: Tags,
}

/// Walk a container's standard tags into our flattened [`Tags`] struct.
/// Mirrors the generic-tag tier: first occurrence of a given field wins.
fn apply_generic_tags(tags: &mut Tags, symphonia_tags: &[Tag]) {
    for tag in symphonia_tags {
        let Some(key) = tag.std_key else { continue };
        let value = tag.value.to_string();
        if value.trim().is_empty() {
            continue;
        }
        match key {
            StandardTagKey::TrackTitle if tags.title.is_none() => tags.title = Some(value),
            StandardTagKey::Artist if tags.artist.is_none() => tags.artist = Some(value),
            StandardTagKey::Album if tags.album.is_none() => tags.album = Some(value),
            StandardTagKey::AlbumArtist if tags.album_artist.is_none() => {
                tags.album_artist = Some(value)
            }
            StandardTagKey::Genre if tags.genre.is_none() => {
                tags.genre = Some(value.split(';').next().unwrap_or("").to_string())
            }
            StandardTagKey::Comment if tags.comment.is_none() => tags.comment = Some(value),
            StandardTagKey::Composer if tags.composer.is_none() => tags.composer = Some(value),
            StandardTagKey::ContentGroup if tags.grouping.is_none() => tags.grouping = Some(value),
            StandardTagKey::TrackNumber if tags.track.is_none() => {
                tags.track = parse_leading_int(&value)
            }
            StandardTagKey::TrackTotal if tags.total_tracks.is_none() => {
                tags.total_tracks = parse_leading_int(&value)
            }
            StandardTagKey::DiscNumber if tags.disc.is_none() => {
                tags.disc = parse_leading_int(&value)
            }
            StandardTagKey::DiscTotal if tags.total_discs.is_none() => {
                tags.total_discs = parse_leading_int(&value)
            }
            StandardTagKey::Date if tags.year.is_none() => {
                tags.year = value.get(0..4).and_then(|s| s.parse().ok())
            }
            StandardTagKey::SortTrackTitle if tags.title_sort.is_none() => {
                tags.title_sort = Some(value)
            }
            StandardTagKey::SortArtist if tags.artist_sort.is_none() => {
                tags.artist_sort = Some(value)
            }
            StandardTagKey::SortAlbum if tags.album_sort.is_none() => tags.album_sort = Some(value),
            StandardTagKey::SortAlbumArtist if tags.album_artist_sort.is_none() => {
                tags.album_artist_sort = Some(value)
            }
            _ => {}
        }
    }
}

/// "1/12" style fields: take the numerator.
fn parse_leading_int(value: &str) -> Option<u32> {
    value.split('/').next()?.trim().parse().ok()
}

/// Inspect a file's container and codecs without decoding any audio.
/// Mirrors `gpod_ff_scan`: opens the container, finds the best audio
/// stream (and any H.264 video stream), classifies native iPod support,
/// and extracts tags.
pub fn scan(path: impl AsRef<Path>, device: DeviceGeneration) -> Result<MediaInfo> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|_| Error::FileNotFound(path.to_path_buf()))?;
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::probe(path, e.to_string()))?;

    let mut format = probed.format;
    let container_format = probed_format_name(&hint);

    let mut tags = Tags::default();
    if let Some(meta) = format.metadata().current() {
        apply_generic_tags(&mut tags, meta.tags());
    }

    let audio_track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.channels.is_some() || t.codec_params.sample_rate.is_some())
        .cloned();
    // Only an H.264-coded stream counts as video. Embedded MJPEG cover
    // art (and any other image/video codec tagged with width/height)
    // is ignored, per the device's own handling of iTunes-prepared files.
    let video_track = format
        .tracks()
        .iter()
        .find(|t| {
            t.codec_params.width.is_some()
                && t.codec_params.height.is_some()
                && t.codec_params.codec == symphonia::core::codecs::CODEC_TYPE_H264
        })
        .cloned();

    let mut info = MediaInfo {
        path: path.to_path_buf(),
        file_size,
        container_format,
        description: "unknown".to_string(),
        has_audio: false,
        has_video: false,
        supported_ipod_fmt: false,
        audio: AudioInfo::default(),
        video: VideoInfo::default(),
        tags,
    };

    if let Some(track) = audio_track {
        info.has_audio = true;
        let params = &track.codec_params;
        info.audio.codec = Some(params.codec);
        info.audio.codec_name = codec_short_name(params.codec);
        info.audio.samplerate = params.sample_rate.unwrap_or(0);
        info.audio.channels = params.channels.map(|c| c.count() as u32).unwrap_or(2);
        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            info.audio.song_length_ms = ((frames as f64 / rate as f64) * 1000.0) as u32;
        }
        info.audio.bitrate_kbps = estimate_bitrate_kbps(file_size, info.audio.song_length_ms);
        info.description = format!("{} audio", info.audio.codec_name);
    }

    if let Some(track) = video_track {
        info.has_video = true;
        let params = &track.codec_params;
        info.video.codec = Some(params.codec);
        info.video.width = params.width.unwrap_or(0);
        info.video.height = params.height.unwrap_or(0);
        info.video.profile = params.extra_data.as_deref().and_then(h264_profile_name);
        info.description = "video".to_string();
    }

    if !info.has_audio && !info.has_video {
        return Err(Error::probe(path, "no audio or video stream found"));
    }

    info.supported_ipod_fmt = if info.has_video {
        device_supports_video(device, &info.video, &info.audio)
    } else {
        is_natively_supported_audio_codec(&info.audio.codec_name)
    };

    Ok(info)
}

fn probed_format_name(hint: &Hint) -> String {
    format!("{:?}", hint)
}

fn codec_short_name(codec: CodecType) -> String {
    use symphonia::core::codecs::{
        CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_H264, CODEC_TYPE_MJPEG,
        CODEC_TYPE_MP3, CODEC_TYPE_VORBIS,
    };
    match codec {
        CODEC_TYPE_MP3 => "mp3",
        CODEC_TYPE_AAC => "aac",
        CODEC_TYPE_ALAC => "alac",
        CODEC_TYPE_FLAC => "flac",
        CODEC_TYPE_VORBIS => "vorbis",
        CODEC_TYPE_H264 => "h264",
        CODEC_TYPE_MJPEG => "mjpeg",
        _ => "unknown",
    }
    .to_string()
}

/// Decode the AVCProfileIndication byte out of an `avcC` extradata blob
/// (`[version, profile_idc, profile_compat, level_idc, ...]`) into the
/// profile names the device's video-capability table recognizes.
fn h264_profile_name(extra_data: &[u8]) -> Option<String> {
    let profile_idc = *extra_data.get(1)?;
    Some(
        match profile_idc {
            66 => "baseline",
            77 => "main",
            88 => "extended",
            100 => "high",
            110 => "high10",
            122 => "high422",
            144 | 244 => "high444",
            _ => return None,
        }
        .to_string(),
    )
}

/// Audio codecs the device can play without any transcoding.
fn is_natively_supported_audio_codec(codec_name: &str) -> bool {
    matches!(codec_name, "mp3" | "aac" | "alac")
}

/// A single row of the video-capability table: resolution/bitrate/fps
/// ceilings plus which device generations accept them.
struct VideoSupportRow {
    max_width: u32,
    max_height: u32,
    max_vbit_rate_kbps: u32,
    max_fps: f32,
    max_samplerate: u32,
    max_channels: u32,
    allowed_profiles: &'static [&'static str],
    devices: &'static [DeviceGeneration],
}

const VIDEO_SUPPORT: &[VideoSupportRow] = &[
    VideoSupportRow {
        max_width: 640,
        max_height: 480,
        max_vbit_rate_kbps: 2500,
        max_fps: 30.0,
        max_samplerate: 48_000,
        max_channels: 2,
        allowed_profiles: &["baseline", "main"],
        devices: &[DeviceGeneration::Video1, DeviceGeneration::Video2],
    },
    // 1280x720 is documented by the device library but never actually
    // selectable on any real generation; kept here for reference only.
    VideoSupportRow {
        max_width: 1280,
        max_height: 720,
        max_vbit_rate_kbps: 2500,
        max_fps: 30.0,
        max_samplerate: 48_000,
        max_channels: 2,
        allowed_profiles: &["baseline", "main", "high"],
        devices: &[],
    },
];

fn device_supports_video(device: DeviceGeneration, video: &VideoInfo, audio: &AudioInfo) -> bool {
    VIDEO_SUPPORT.iter().any(|row| {
        video.height <= row.max_height
            && video.width <= row.max_width
            && video.bitrate_kbps <= row.max_vbit_rate_kbps
            && video.fps <= row.max_fps
            && audio.samplerate <= row.max_samplerate
            && audio.channels <= row.max_channels
            && video.profile.as_deref().map(|p| row.allowed_profiles.contains(&p)).unwrap_or(false)
            && row.devices.contains(&device)
    })
}

fn estimate_bitrate_kbps(file_size: u64, duration_ms: u32) -> u32 {
    if duration_ms == 0 {
        return 0;
    }
    ((file_size * 8) / (duration_ms as u64) ) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natively_supported_audio_codecs() {
        assert!(is_natively_supported_audio_codec("mp3"));
        assert!(is_natively_supported_audio_codec("aac"));
        assert!(is_natively_supported_audio_codec("alac"));
        assert!(!is_natively_supported_audio_codec("flac"));
        assert!(!is_natively_supported_audio_codec("vorbis"));
    }

    #[test]
    fn parse_leading_int_handles_fraction() {
        assert_eq!(parse_leading_int("3/12"), Some(3));
        assert_eq!(parse_leading_int("7"), Some(7));
        assert_eq!(parse_leading_int("x"), None);
    }

    #[test]
    fn video_support_rejects_over_resolution() {
        let video = VideoInfo {
            codec: None,
            width: 1920,
            height: 1080,
            profile: Some("high".to_string()),
            bitrate_kbps: 2000,
            fps: 24.0,
        };
        let audio = AudioInfo {
            samplerate: 44100,
            channels: 2,
            ..Default::default()
        };
        assert!(!device_supports_video(DeviceGeneration::Video2, &video, &audio));
    }

    #[test]
    fn video_support_accepts_within_bounds() {
        let video = VideoInfo {
            codec: None,
            width: 640,
            height: 480,
            profile: Some("baseline".to_string()),
            bitrate_kbps: 1200,
            fps: 25.0,
        };
        let audio = AudioInfo {
            samplerate: 44100,
            channels: 2,
            ..Default::default()
        };
        assert!(device_supports_video(DeviceGeneration::Video1, &video, &audio));
    }

    #[test]
    fn unrecognized_profile_is_rejected() {
        let video = VideoInfo {
            codec: None,
            width: 640,
            height: 480,
            profile: None,
            bitrate_kbps: 1200,
            fps: 25.0,
        };
        let audio = AudioInfo {
            samplerate: 44100,
            channels: 2,
            ..Default::default()
        };
        assert!(!device_supports_video(DeviceGeneration::Video1, &video, &audio));
    }

    #[test]
    fn documentation_only_row_is_never_selectable() {
        let video = VideoInfo {
            codec: None,
            width: 1280,
            height: 720,
            profile: Some("high".to_string()),
            bitrate_kbps: 2000,
            fps: 24.0,
        };
        let audio = AudioInfo {
            samplerate: 44100,
            channels: 2,
            ..Default::default()
        };
        assert!(!device_supports_video(DeviceGeneration::Unknown, &video, &audio));
        assert!(!device_supports_video(DeviceGeneration::Video2, &video, &audio));
    }

    #[test]
    fn h264_profile_name_decodes_avcc_byte() {
        assert_eq!(h264_profile_name(&[1, 100, 0, 40]), Some("high".to_string()));
        assert_eq!(h264_profile_name(&[1, 66, 0, 30]), Some("baseline".to_string()));
    }

    #[test]
    fn scan_missing_file_is_file_not_found() {
        let err = scan("/nonexistent/track.mp3", DeviceGeneration::AudioOnly).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
