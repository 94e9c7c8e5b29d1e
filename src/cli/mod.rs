//! Command line surface: `add` (ingest), `verify`, `rm`, `tag`, and `list`.
//!
//! Mirrors the original tool's split into one binary per concern; here
//! they're subcommands of a single binary, which is the idiomatic clap
//! shape the rest of this codebase already uses.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::catalog::{Catalog, MediaType};
use crate::device_path;
use crate::error::{Error, Result};
use crate::ingest::{IngestOptions, IngestRun};
use crate::lock::ProcessLock;
use crate::probe::DeviceGeneration;
use crate::recent_playlist::DEFAULT_RECENT_PLAYLIST_NAME;
use crate::transcode::{Encoder, Quality, TranscodeRequest};
use crate::verify::{ChecksumMode, OrphanMode, VerifyOptions};

#[derive(Parser, Debug)]
#[command(name = "gpod-cp", version, about = "Copy and manage media on a device catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest files onto the device, updating the catalog.
    Add(AddArgs),
    /// Reconcile the catalog against the device filesystem.
    Verify(VerifyArgs),
    /// Remove tracks from the catalog and device.
    Rm(RmArgs),
    /// Edit tags on an existing catalog track.
    Tag(TagArgs),
    /// List catalog contents.
    List(ListArgs),
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Device mount point.
    #[arg(short = 'M', long)]
    pub mount_point: PathBuf,

    /// Files or directories to ingest.
    pub paths: Vec<PathBuf>,

    /// Recompute/store fingerprints for added tracks.
    #[arg(short = 'c', long)]
    pub cksum: bool,

    /// Evict any existing track with the same (title, album, artist).
    #[arg(short = 'r', long)]
    pub replace: bool,

    /// Allow device-unsupported media through anyway.
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Encoder to use when transcoding is needed (mp3, aac, aac-ffmpeg, alac).
    #[arg(short = 'e', long, default_value = "mp3")]
    pub enc: String,

    /// Transcode quality: `vbr0`..`vbr9`, a named CBR preset
    /// (`cbr96`/`128`/`160`/`192`/`256`/`320`), a raw bitrate in
    /// bits/sec, or `max`.
    #[arg(short = 'q', long, default_value = "vbr2")]
    pub quality: String,

    /// Copy container metadata into transcoded output.
    #[arg(short = 'S', long)]
    pub sync_meta: bool,

    /// Sanitize text fields (strip control characters) before storing.
    #[arg(long)]
    pub sanitize: bool,

    /// Maximum concurrent worker threads.
    #[arg(short = 'n', long, default_value_t = 4)]
    pub max_threads: usize,

    /// Recent-listening playlist track budget; 0 disables rebuilding it.
    #[arg(short = 'P', long, default_value_t = 25)]
    pub recent_limit: usize,

    /// Base name for the recent-listening playlists (`"<name>: <window>"`).
    #[arg(long = "playlist-name", default_value = DEFAULT_RECENT_PLAYLIST_NAME)]
    pub playlist_name: String,

    /// If the configured encoder isn't available on this host's ffmpeg
    /// build, fall back to mp3 instead of failing the item.
    #[arg(long = "encoder-fallback")]
    pub encoder_fallback: bool,

    /// Force every ingested track's media type instead of inferring it
    /// from the probe (audio, movie, podcast, audiobook).
    #[arg(long = "mediatype")]
    pub mediatype: Option<String>,

    /// Spoof `time_added` for every track ingested this run, as an
    /// ISO-8601 timestamp, instead of using the current time.
    #[arg(long = "tracks-time-added")]
    pub tracks_time_added: Option<String>,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    #[arg(short = 'M', long)]
    pub mount_point: PathBuf,

    /// Add filesystem files the catalog doesn't know about.
    #[arg(short = 'a', long)]
    pub add: bool,

    /// Delete filesystem files the catalog doesn't know about.
    #[arg(short = 'd', long)]
    pub delete: bool,

    /// Fill in fingerprints that are missing.
    #[arg(short = 'c', long = "checksum-missing")]
    pub checksum_missing: bool,

    /// Recompute every fingerprint.
    #[arg(short = 'C', long = "checksum-regen")]
    pub checksum_regen: bool,

    #[arg(short = 'T', long = "checksum-threads", default_value_t = 4)]
    pub checksum_threads: usize,

    #[arg(short = 'n', long = "checksum-sync", default_value_t = 100)]
    pub checksum_sync: u32,
}

#[derive(Parser, Debug)]
pub struct RmArgs {
    #[arg(short = 'M', long)]
    pub mount_point: PathBuf,
    pub track_ids: Vec<u64>,
}

#[derive(Parser, Debug)]
pub struct TagArgs {
    #[arg(short = 'M', long)]
    pub mount_point: PathBuf,
    pub track_id: u64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub artist: Option<String>,
    #[arg(long)]
    pub album: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    #[arg(short = 'M', long)]
    pub mount_point: PathBuf,
}

fn catalog_path(mount_point: &std::path::Path) -> PathBuf {
    mount_point.join("iPod_Control").join("iTunes").join("iTunesDB")
}

fn install_cancel_flag() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel.clone();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio runtime for signal handling");
        rt.block_on(async move {
            let _ = tokio::signal::ctrl_c().await;
            handler_flag.store(true, Ordering::SeqCst);
        });
    });
    cancel
}

/// Named constant-bitrate presets, in kbps, the CLI accepts directly
/// (`cbr128`/`128` both work).
const CBR_PRESETS: &[(&str, u32)] = &[
    ("96", 96_000),
    ("128", 128_000),
    ("160", 160_000),
    ("192", 192_000),
    ("256", 256_000),
    ("320", 320_000),
];

fn parse_quality(s: &str) -> Result<Quality> {
    if s.eq_ignore_ascii_case("max") {
        return Ok(Quality::Max);
    }
    if let Some(level) = s.to_lowercase().strip_prefix("vbr") {
        let level: u8 = level.parse().map_err(|_| Error::config(format!("bad quality: {s}")))?;
        return Ok(Quality::Vbr(level));
    }
    if let Some(preset) = s.to_lowercase().strip_prefix("cbr") {
        if let Some((_, bps)) = CBR_PRESETS.iter().find(|(name, _)| *name == preset) {
            return Ok(Quality::Cbr(*bps));
        }
        return Err(Error::config(format!("unknown cbr preset: {s}")));
    }
    let bps: u32 = s.parse().map_err(|_| Error::config(format!("bad quality: {s}")))?;
    Ok(Quality::Cbr(bps))
}

fn parse_encoder(s: &str) -> Result<Encoder> {
    match s.to_lowercase().as_str() {
        "mp3" => Ok(Encoder::Mp3),
        // `aac` prefers the fdk-aac encoder when available; the native
        // ffmpeg AAC encoder is opted into explicitly as `aac-ffmpeg`.
        "aac" => Ok(Encoder::FdkAac),
        "aac-ffmpeg" => Ok(Encoder::Aac),
        "alac" => Ok(Encoder::Alac),
        other => Err(Error::config(format!("unknown encoder: {other}"))),
    }
}

fn parse_media_type(s: &str) -> Result<MediaType> {
    match s.to_lowercase().as_str() {
        "audio" => Ok(MediaType::Audio),
        "movie" | "video" => Ok(MediaType::Movie),
        "podcast" => Ok(MediaType::Podcast),
        "audiobook" => Ok(MediaType::Audiobook),
        other => Err(Error::config(format!("unknown mediatype: {other}"))),
    }
}

fn parse_time_added(s: &str) -> Result<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|_| Error::config(format!("bad ISO-8601 timestamp: {s}")))
}

pub fn run(cli: &Cli, config: &crate::config::Config) -> Result<()> {
    match &cli.command {
        Command::Add(args) => run_add(args, config),
        Command::Verify(args) => run_verify(args),
        Command::Rm(args) => run_rm(args),
        Command::Tag(args) => run_tag(args),
        Command::List(args) => run_list(args),
    }
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in walkdir::WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn run_add(args: &AddArgs, config: &crate::config::Config) -> Result<()> {
    let _lock = ProcessLock::acquire(&config.device.lock_dir)?;
    let cancel = install_cancel_flag();

    let catalog = Catalog::parse(catalog_path(&args.mount_point))?;
    let files = collect_files(&args.paths);

    let transcode = Some(TranscodeRequest {
        encoder: parse_encoder(&args.enc)?,
        quality: parse_quality(&args.quality)?,
        sync_meta: args.sync_meta,
        tmp_dir: std::env::temp_dir(),
    });

    let media_type_override = args.mediatype.as_deref().map(parse_media_type).transpose()?;
    let time_added_override = args.tracks_time_added.as_deref().map(parse_time_added).transpose()?;

    let options = IngestOptions {
        device: DeviceGeneration::AudioOnly,
        max_threads: args.max_threads,
        force: args.force,
        checksum: args.cksum,
        sanitize: args.sanitize,
        replace: args.replace,
        recent_limit: args.recent_limit,
        recent_playlist_name: args.playlist_name.clone(),
        transcode,
        device_root: args.mount_point.clone(),
        device_music_dir: args.mount_point.join("iPod_Control").join("Music").join("F00"),
        write_every: 10,
        encoder_fallback: args.encoder_fallback,
        media_type_override,
        time_added_override,
    };

    let run = IngestRun::new(catalog, options, cancel);
    let (stats, failed, replaced) = run.run(&files)?;

    tracing::info!(?stats, "ingest complete");
    for failure in &failed {
        tracing::warn!(path = %failure.path.display(), message = %failure.message, "item failed");
    }
    for r in &replaced {
        tracing::info!(title = %r.title, artist = %r.artist, album = %r.album, "replaced existing track");
    }

    Ok(())
}

fn run_verify(args: &VerifyArgs) -> Result<()> {
    let mut catalog = Catalog::parse(catalog_path(&args.mount_point))?;

    let orphan_mode = if args.add {
        OrphanMode::AddBack
    } else if args.delete {
        OrphanMode::Remove
    } else {
        OrphanMode::Report
    };

    let checksum_mode = if args.checksum_regen {
        ChecksumMode::RegenerateAll
    } else if args.checksum_missing {
        ChecksumMode::Missing
    } else {
        ChecksumMode::None
    };

    let options = VerifyOptions {
        device_root: args.mount_point.clone(),
        device: DeviceGeneration::AudioOnly,
        orphan_mode,
        checksum_mode,
        checksum_threads: args.checksum_threads,
        sync_limit: args.checksum_sync,
    };

    let stats = crate::verify::verify(&mut catalog, &options)?;
    tracing::info!(?stats, "verification complete");
    Ok(())
}

fn run_rm(args: &RmArgs) -> Result<()> {
    let mut catalog = Catalog::parse(catalog_path(&args.mount_point))?;
    for id in &args.track_ids {
        if let Some(track) = catalog.remove_track(*id) {
            let path = device_path::resolve(&args.mount_point, &track.ipod_path);
            let _ = std::fs::remove_file(path);
        }
    }
    catalog.write()?;
    Ok(())
}

fn run_tag(args: &TagArgs) -> Result<()> {
    let mut catalog = Catalog::parse(catalog_path(&args.mount_point))?;
    let track = catalog
        .tracks
        .get_mut(&args.track_id)
        .ok_or_else(|| Error::config(format!("no such track id {}", args.track_id)))?;
    if let Some(title) = &args.title {
        track.title = title.clone();
    }
    if let Some(artist) = &args.artist {
        track.artist = artist.clone();
    }
    if let Some(album) = &args.album {
        track.album = album.clone();
    }
    catalog.write()?;
    Ok(())
}

fn run_list(args: &ListArgs) -> Result<()> {
    let catalog = Catalog::parse(catalog_path(&args.mount_point))?;
    for id in &catalog.master_playlist().track_ids {
        if let Some(track) = catalog.track(*id) {
            println!("{}\t{}\t{}\t{}", track.id, track.artist, track.album, track.title);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quality_handles_vbr_max_and_cbr() {
        assert_eq!(parse_quality("vbr2").unwrap(), Quality::Vbr(2));
        assert_eq!(parse_quality("max").unwrap(), Quality::Max);
        assert_eq!(parse_quality("192000").unwrap(), Quality::Cbr(192_000));
        assert!(parse_quality("garbage").is_err());
    }

    #[test]
    fn parse_encoder_rejects_unknown() {
        assert_eq!(parse_encoder("mp3").unwrap(), Encoder::Mp3);
        assert!(parse_encoder("wma").is_err());
    }

    #[test]
    fn parse_encoder_prefers_fdk_aac_and_allows_opt_out() {
        assert_eq!(parse_encoder("aac").unwrap(), Encoder::FdkAac);
        assert_eq!(parse_encoder("aac-ffmpeg").unwrap(), Encoder::Aac);
    }

    #[test]
    fn parse_quality_handles_named_cbr_presets() {
        assert_eq!(parse_quality("cbr128").unwrap(), Quality::Cbr(128_000));
        assert_eq!(parse_quality("cbr320").unwrap(), Quality::Cbr(320_000));
        assert!(parse_quality("cbr999").is_err());
    }

    #[test]
    fn parse_media_type_covers_all_variants() {
        assert_eq!(parse_media_type("audio").unwrap(), MediaType::Audio);
        assert_eq!(parse_media_type("podcast").unwrap(), MediaType::Podcast);
        assert_eq!(parse_media_type("audiobook").unwrap(), MediaType::Audiobook);
        assert!(parse_media_type("bogus").is_err());
    }

    #[test]
    fn catalog_path_builds_device_layout() {
        let path = catalog_path(std::path::Path::new("/mnt/ipod"));
        assert_eq!(path, PathBuf::from("/mnt/ipod/iPod_Control/iTunes/iTunesDB"));
    }
}
