//! Transcoder: decode -> optional resample -> encode pipeline for audio
//! that isn't natively playable on the target device.
//!
//! Structure mirrors a typical ffmpeg/libav transcode: open the input,
//! resolve an encoder by name (not codec id, since a codec can be
//! implemented by more than one encoder), pick an output sample rate,
//! set up a resampler only if rates differ, and drive two possible main
//! loop shapes depending on whether resampling is needed at all.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::sample::Sample;
use ffmpeg_next::software::resampling::Context as Resampler;

use crate::error::{Error, Result};

pub const MAX_SAMPLERATE: u32 = 48_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Mp3,
    /// ffmpeg's built-in (non-fdk) AAC encoder.
    Aac,
    /// `libfdk_aac`, the preferred AAC path when the host ffmpeg build
    /// carries it; has its own 1-5 VBR scale (see `quality_scale_factor`).
    FdkAac,
    Alac,
}

impl Encoder {
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Encoder::Mp3 => "libmp3lame",
            Encoder::Aac => "aac",
            Encoder::FdkAac => "libfdk_aac",
            Encoder::Alac => "alac",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Encoder::Mp3 => "mp3",
            Encoder::Aac | Encoder::FdkAac | Encoder::Alac => "m4a",
        }
    }
}

/// Whether ffmpeg, as built on this host, has the named encoder
/// available at all. The orchestrator uses this to decide whether to
/// fall back to mp3 rather than failing the item outright.
pub fn encoder_available(encoder: Encoder) -> bool {
    ffmpeg::init().ok();
    ffmpeg::encoder::find_by_name(encoder.ffmpeg_name()).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quality {
    /// Variable bitrate, 0 (best) through 9 (smallest).
    Vbr(u8),
    /// Constant bitrate, in bits/sec.
    Cbr(u32),
    /// Use the encoder's own default/maximum settings.
    Max,
}

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub encoder: Encoder,
    pub quality: Quality,
    pub sync_meta: bool,
    pub tmp_dir: PathBuf,
}

impl TranscodeRequest {
    /// Build a staged output path: `<tmp_dir>/.gpod-<pid>-<n>.<ext>`.
    pub fn staged_path(&self, sequence: u64) -> PathBuf {
        self.tmp_dir.join(format!(".gpod-{}-{}.{}", std::process::id(), sequence, self.encoder.extension()))
    }
}

/// Pick the output sample rate: prefer the highest encoder-supported
/// rate at or below [`MAX_SAMPLERATE`]; if the input's native rate is at
/// or above that cap, use the cap; otherwise, use the nearest
/// encoder-supported rate at or below the input's rate (falling back to
/// the encoder's lowest supported rate if none qualifies).
pub fn select_samplerate(input_rate: u32, supported: &[u32]) -> u32 {
    if supported.is_empty() {
        return input_rate.min(MAX_SAMPLERATE);
    }

    let capped_max = supported.iter().copied().filter(|&r| r <= MAX_SAMPLERATE).max();
    let min_supported = supported.iter().copied().min().unwrap_or(input_rate);

    let Some(capped_max) = capped_max else {
        return min_supported;
    };

    if input_rate >= capped_max {
        return capped_max;
    }

    supported
        .iter()
        .copied()
        .filter(|&r| r <= input_rate)
        .max()
        .unwrap_or(min_supported)
}

/// Scale factor applied to VBR quality levels before handing them to the
/// encoder as `global_quality`; matches ffmpeg's QP2LAMBDA convention.
/// `FdkAac` doesn't use this at all: it has its own 1-5 scale, computed
/// directly in [`vbr_quality_value`].
fn quality_scale_factor(encoder: Encoder) -> f32 {
    match encoder {
        Encoder::Alac => 0.0,
        Encoder::Mp3 | Encoder::Aac => 118.0, // FF_QP2LAMBDA
        Encoder::FdkAac => 0.0,
    }
}

/// Map a `0..9` VBR level (0 = best) to the value handed to
/// `set_quality`. Every encoder but fdk-aac uses `level * scale_factor`;
/// fdk-aac's native VBR modes run `1..5` (best to worst), so the source
/// tool remaps one-way with `-1 * (level/2 - 5)`.
fn vbr_quality_value(encoder: Encoder, level: u8) -> usize {
    match encoder {
        Encoder::FdkAac => {
            let remapped = -1.0 * (level as f32 / 2.0 - 5.0);
            remapped.round().clamp(1.0, 5.0) as usize
        }
        _ => (level as f32 * quality_scale_factor(encoder)) as usize,
    }
}

/// Run the full transcode. On success, `request.staged_path` holds the
/// encoded output and `out_len_ms`/`out_size` describe it.
pub fn transcode(input_path: impl AsRef<Path>, request: &TranscodeRequest, sequence: u64) -> Result<PathBuf> {
    let input_path = input_path.as_ref();
    ffmpeg::init().map_err(|e| Error::transcode(input_path, e.to_string()))?;

    let mut input = ffmpeg::format::input(&input_path)
        .map_err(|e| Error::transcode(input_path, format!("open input: {e}")))?;
    let input_stream = input
        .streams()
        .best(ffmpeg::media::Type::Audio)
        .ok_or_else(|| Error::transcode(input_path, "no audio stream"))?;
    let input_stream_index = input_stream.index();

    let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
        .map_err(|e| Error::transcode(input_path, format!("decoder context: {e}")))?;
    let mut decoder = decoder_ctx
        .decoder()
        .audio()
        .map_err(|e| Error::transcode(input_path, format!("open decoder: {e}")))?;

    let out_path = request.staged_path(sequence);
    let mut output = ffmpeg::format::output(&out_path)
        .map_err(|e| Error::transcode(input_path, format!("open output: {e}")))?;

    let encoder_codec = ffmpeg::encoder::find_by_name(request.encoder.ffmpeg_name())
        .ok_or_else(|| Error::transcode(input_path, format!("encoder {} unavailable", request.encoder.ffmpeg_name())))?;

    let mut out_stream = output
        .add_stream(encoder_codec)
        .map_err(|e| Error::transcode(input_path, format!("add stream: {e}")))?;

    let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(encoder_codec)
        .encoder()
        .audio()
        .map_err(|e| Error::transcode(input_path, format!("encoder context: {e}")))?;

    let supported_rates = encoder_supported_rates(encoder_codec);
    let out_rate = select_samplerate(decoder.rate(), &supported_rates);

    encoder_ctx.set_rate(out_rate as i32);
    encoder_ctx.set_channel_layout(decoder.channel_layout());
    encoder_ctx.set_format(Sample::F32(ffmpeg::format::sample::Type::Planar));

    match request.quality {
        Quality::Cbr(bps) => encoder_ctx.set_bit_rate(bps as usize),
        Quality::Vbr(level) => {
            encoder_ctx.set_quality(vbr_quality_value(request.encoder, level));
        }
        Quality::Max => {}
    }

    if output.format().flags().contains(ffmpeg::format::Flags::GLOBAL_HEADER) {
        encoder_ctx.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
    }

    let mut encoder = encoder_ctx
        .open()
        .map_err(|e| Error::transcode(input_path, format!("open encoder: {e}")))?;
    out_stream.set_parameters(&encoder);

    if request.sync_meta {
        for (k, v) in input.metadata().iter() {
            output.metadata_mut().set(k, v);
        }
    }

    output
        .write_header()
        .map_err(|e| Error::transcode(input_path, format!("write header: {e}")))?;

    let in_rate = decoder.rate();
    let needs_resample = out_rate != in_rate || decoder.format() != encoder.format();
    let mut resampler: Option<Resampler> = if needs_resample {
        Some(
            ffmpeg::software::resampler(
                (decoder.format(), decoder.channel_layout(), in_rate),
                (encoder.format(), encoder.channel_layout(), out_rate),
            )
            .map_err(|e| Error::transcode(input_path, format!("init resampler: {e}")))?,
        )
    } else {
        None
    };

    // Single monotonic PTS counter: every encoded frame's timestamp is
    // the running sum of samples encoded so far, regardless of how many
    // decoded frames fed into it.
    let mut pts: i64 = 0;
    let out_stream_index = out_stream.index();

    // Batch whatever comes out of decode/resample into frames sized to
    // the encoder's fixed frame size (0 means "any size is fine", e.g.
    // some PCM/ALAC-style encoders).
    let channels = encoder.channel_layout().channels() as usize;
    let frame_size = encoder.frame_size() as usize;
    let mut fifo = SampleFifo::new(channels.max(1));

    for (stream, packet) in input.packets() {
        if stream.index() != input_stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| Error::transcode(input_path, format!("decode send: {e}")))?;

        let mut frame = ffmpeg::frame::Audio::empty();
        while decoder.receive_frame(&mut frame).is_ok() {
            let to_push = if let Some(resampler) = resampler.as_mut() {
                // Same-rate path resamples format/layout only and the
                // input/output sample counts match; the rate-converting
                // path needs the output count computed up front from the
                // resampler's internal delay, mirroring `swr_get_delay`.
                let expected_out = if out_rate == in_rate {
                    frame.samples()
                } else {
                    let delay = resampler_delay_input_samples(resampler);
                    (((delay + frame.samples() as i64) * out_rate as i64) / in_rate as i64).max(0) as usize
                };
                let mut converted =
                    ffmpeg::frame::Audio::new(encoder.format(), expected_out.max(1), encoder.channel_layout());
                resampler
                    .run(&frame, &mut converted)
                    .map_err(|e| Error::transcode(input_path, format!("resample: {e}")))?;
                converted
            } else {
                frame.clone()
            };

            fifo.push(&to_push);
            encode_available(&mut fifo, frame_size, out_rate, encoder.channel_layout(), encoder.format(), &mut encoder, &mut pts, &mut output, out_stream_index, input_path)?;
        }
    }

    decoder
        .send_eof()
        .map_err(|e| Error::transcode(input_path, format!("decoder flush: {e}")))?;
    let mut frame = ffmpeg::frame::Audio::empty();
    while decoder.receive_frame(&mut frame).is_ok() {
        fifo.push(&frame);
        encode_available(&mut fifo, frame_size, out_rate, encoder.channel_layout(), encoder.format(), &mut encoder, &mut pts, &mut output, out_stream_index, input_path)?;
    }
    // Drain whatever remains short of a full frame: most encoders accept
    // a shorter final frame.
    if fifo.len() > 0 {
        let remaining = fifo.len();
        let tail = fifo.pop_frame(remaining, out_rate, encoder.channel_layout(), encoder.format());
        encode_and_write(&mut encoder, &tail, &mut pts, &mut output, out_stream_index, input_path)?;
    }

    // Flush the encoder: keep calling with no input until it stops
    // producing packets.
    encoder.send_eof().ok();
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(out_stream_index);
        packet.write_interleaved(&mut output).ok();
    }

    output
        .write_trailer()
        .map_err(|e| Error::transcode(input_path, format!("write trailer: {e}")))?;

    Ok(out_path)
}

/// Best-effort read of the resampler's internal delay, expressed in
/// input-rate samples, mirroring `swr_get_delay(swr, in_rate)`. Used to
/// size the destination frame for the rate-converting path before
/// calling `run`, so the whole converted buffer lands in one frame
/// instead of being truncated.
fn resampler_delay_input_samples(resampler: &Resampler) -> i64 {
    resampler.delay().map(|d| d.input as i64).unwrap_or(0)
}

/// Query the set of sample rates an encoder codec declares support for.
/// Some codecs (notably ALAC) declare none, meaning "any rate is fine".
fn encoder_supported_rates(codec: ffmpeg::Codec) -> Vec<u32> {
    codec
        .audio()
        .and_then(|audio| audio.rates())
        .map(|rates| rates.map(|r| r as u32).collect())
        .unwrap_or_default()
}

/// Planar f32 sample buffer, one `Vec<f32>` per channel, used to batch
/// decoded/resampled audio up to the encoder's fixed frame size before
/// encoding. Samples are pushed in arrival order and popped from the
/// front in FIFO order, matching the ffmpeg example tools' `AVAudioFifo`
/// usage.
struct SampleFifo {
    channels: Vec<Vec<f32>>,
}

impl SampleFifo {
    fn new(channel_count: usize) -> Self {
        Self {
            channels: (0..channel_count.max(1)).map(|_| Vec::new()).collect(),
        }
    }

    fn push(&mut self, frame: &ffmpeg::frame::Audio) {
        let samples = frame.samples();
        for (ch, buf) in self.channels.iter_mut().enumerate() {
            if ch >= frame.planes() {
                continue;
            }
            let plane: &[f32] = frame.plane(ch);
            buf.extend_from_slice(&plane[..samples.min(plane.len())]);
        }
    }

    fn len(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Remove and return the first `count` samples per channel as a new
    /// planar frame at `rate`/`layout`/`format`.
    fn pop_frame(
        &mut self,
        count: usize,
        rate: u32,
        layout: ffmpeg::ChannelLayout,
        format: Sample,
    ) -> ffmpeg::frame::Audio {
        let mut frame = ffmpeg::frame::Audio::new(format, count, layout);
        frame.set_rate(rate);
        for (ch, buf) in self.channels.iter_mut().enumerate() {
            let take = count.min(buf.len());
            let drained: Vec<f32> = buf.drain(..take).collect();
            if ch < frame.planes() {
                let plane: &mut [f32] = frame.plane_mut(ch);
                plane[..take].copy_from_slice(&drained);
            }
        }
        frame
    }
}

/// Drain full `frame_size`-sample frames out of `fifo` and encode each
/// one. A `frame_size` of 0 means the encoder accepts any frame length,
/// so everything currently buffered is encoded immediately.
#[allow(clippy::too_many_arguments)]
fn encode_available(
    fifo: &mut SampleFifo,
    frame_size: usize,
    rate: u32,
    layout: ffmpeg::ChannelLayout,
    format: Sample,
    encoder: &mut ffmpeg::encoder::Audio,
    pts: &mut i64,
    output: &mut ffmpeg::format::context::Output,
    out_stream_index: usize,
    input_path: &Path,
) -> Result<()> {
    if frame_size == 0 {
        if fifo.len() > 0 {
            let len = fifo.len();
            let frame = fifo.pop_frame(len, rate, layout, format);
            encode_and_write(encoder, &frame, pts, output, out_stream_index, input_path)?;
        }
        return Ok(());
    }

    while fifo.len() >= frame_size {
        let frame = fifo.pop_frame(frame_size, rate, layout, format);
        encode_and_write(encoder, &frame, pts, output, out_stream_index, input_path)?;
    }
    Ok(())
}

fn encode_and_write(
    encoder: &mut ffmpeg::encoder::Audio,
    frame: &ffmpeg::frame::Audio,
    pts: &mut i64,
    output: &mut ffmpeg::format::context::Output,
    out_stream_index: usize,
    input_path: &Path,
) -> Result<()> {
    let mut frame = frame.clone();
    frame.set_pts(Some(*pts));
    *pts += frame.samples() as i64;

    encoder
        .send_frame(&frame)
        .map_err(|e| Error::transcode(input_path, format!("encode send: {e}")))?;

    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(out_stream_index);
        packet
            .write_interleaved(output)
            .map_err(|e| Error::transcode(input_path, format!("write packet: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_samplerate_caps_high_input_rates() {
        let supported = [44_100, 48_000, 96_000];
        assert_eq!(select_samplerate(96_000, &supported), 48_000);
    }

    #[test]
    fn select_samplerate_keeps_exact_support() {
        let supported = [44_100, 48_000];
        assert_eq!(select_samplerate(44_100, &supported), 44_100);
    }

    #[test]
    fn select_samplerate_rounds_down_to_nearest_supported() {
        let supported = [22_050, 44_100];
        assert_eq!(select_samplerate(32_000, &supported), 22_050);
    }

    #[test]
    fn select_samplerate_falls_back_to_minimum() {
        let supported = [44_100, 48_000];
        assert_eq!(select_samplerate(8_000, &supported), 44_100);
    }

    #[test]
    fn fdk_aac_quality_uses_one_to_five_scale() {
        assert_eq!(vbr_quality_value(Encoder::FdkAac, 0), 5);
        assert_eq!(vbr_quality_value(Encoder::FdkAac, 9), 1);
    }

    #[test]
    fn mp3_quality_uses_qp2lambda_scale() {
        assert_eq!(vbr_quality_value(Encoder::Mp3, 2), (2.0 * 118.0) as usize);
    }

    #[test]
    fn staged_path_uses_encoder_extension() {
        let req = TranscodeRequest {
            encoder: Encoder::Mp3,
            quality: Quality::Max,
            sync_meta: false,
            tmp_dir: "/tmp".into(),
        };
        assert!(req.staged_path(3).to_string_lossy().ends_with(".mp3"));
    }
}
