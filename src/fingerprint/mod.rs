//! Audio fingerprinting: a content hash over the *compressed packet
//! bytes of the selected audio stream only*, invariant to container
//! remuxing (an MP3 stream copied into a different container hashes
//! the same). Demuxing uses `ffmpeg-next` so we read raw packets
//! without decoding.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Hex-encoded SHA-256 digest plus the cheap side-channel checksum used
/// for fast pre-comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hex: String,
    pub cksum: u32,
}

/// Compute the fingerprint of a file's best audio stream.
pub fn fingerprint_file(path: impl AsRef<Path>) -> Result<Fingerprint> {
    let path = path.as_ref();
    ffmpeg::init().map_err(|e| Error::probe(path, e.to_string()))?;

    let mut input = ffmpeg::format::input(&path).map_err(|e| Error::probe(path, e.to_string()))?;
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Audio)
        .ok_or_else(|| Error::probe(path, "no audio stream"))?;
    let stream_index = stream.index();

    let mut hasher = Sha256::new();
    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if let Some(data) = packet.data() {
            hasher.update(data);
        }
    }

    let hex = hex_encode(&hasher.finalize());
    let cksum = djb2(hex.as_bytes());
    Ok(Fingerprint { hex, cksum })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// DJB2 hash, matching the side-channel checksum computed over the
/// fingerprint's hex text for a cheap equality pre-check.
pub fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u32);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn djb2_is_deterministic() {
        assert_eq!(djb2(b"abc"), djb2(b"abc"));
        assert_ne!(djb2(b"abc"), djb2(b"abd"));
    }

    #[test]
    fn djb2_matches_known_seed() {
        // DJB2 of the empty string is the seed value itself.
        assert_eq!(djb2(b""), 5381);
    }

    #[test]
    fn hex_encode_is_lowercase_and_padded() {
        assert_eq!(hex_encode(&[0x0a, 0xff]), "0aff");
    }

    #[test]
    fn fingerprint_missing_file_is_probe_failure() {
        let err = fingerprint_file("/nonexistent/track.mp3").unwrap_err();
        assert!(matches!(err, Error::ProbeFailure { .. }));
    }
}
