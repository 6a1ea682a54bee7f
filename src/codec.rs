//! Codec Adapter
//!
//! Stands in for the underlying sound-codec library: decode goes through
//! `symphonia` (which already demuxes+decodes all three envelopes this
//! crate cares about), encode is split by container between `hound`
//! (WAV) and a FLAC frame encoder built on `flacenc`.
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::{AudioFormat, Envelope, SampleContainer};
use crate::error::HandlerError;

/// Pull-based decoded-audio source. One call to `read_frames` yields up
/// to `max_frames` interleaved frames; returns 0 at end of stream.
pub trait SoundReader: Send {
    fn format(&self) -> AudioFormat;
    fn total_frames(&self) -> u64;
    fn read_frames(&mut self, out: &mut [f32], max_frames: usize) -> usize;
}

/// Push-based encoded-audio sink. Each call appends the interleaved
/// frames as encoded bytes through `sink`.
pub trait SoundWriter: Send {
    fn write_frames(&mut self, frames: &[f32], channel_count: usize) -> Result<Vec<u8>, HandlerError>;
    /// Final bytes to flush once all frames have been written (FLAC
    /// needs no footer; WAV's header carries a frame count that hound
    /// patches in `finalize`, handled internally by `WavSoundWriter`).
    fn finish(&mut self) -> Result<Vec<u8>, HandlerError>;
}

struct SymphoniaReader {
    format: Box<dyn symphonia::core::formats::FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    audio_format: AudioFormat,
    total_frames: u64,
    leftover: Vec<f32>,
    channels: usize,
}

fn envelope_from_extension(path: &Path) -> Envelope {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "flac" => Envelope::Flac,
        Some(ext) if ext == "ogg" || ext == "oga" => Envelope::Ogg,
        _ => Envelope::Wav,
    }
}

fn container_from_codec_params(params: &CodecParameters) -> SampleContainer {
    if params.codec == CODEC_TYPE_PCM_F32LE || params.codec == CODEC_TYPE_PCM_F64LE {
        return SampleContainer::Float32;
    }
    match params.bits_per_sample.unwrap_or(16) {
        0..=16 => SampleContainer::Pcm16,
        17..=24 => SampleContainer::Pcm24,
        _ => SampleContainer::Pcm32,
    }
}

/// Opens `path` as a sound file via symphonia's format probe. Returns
/// `NotASoundFile` on anything the probe/decoder chain rejects.
pub fn open_reader(path: &Path) -> Result<Box<dyn SoundReader>, HandlerError> {
    let file = File::open(path)?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| HandlerError::NotASoundFile(e.to_string()))?;

    let format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| HandlerError::NotASoundFile("no default audio track".into()))?
        .clone();

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| HandlerError::NotASoundFile(e.to_string()))?;

    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| HandlerError::NotASoundFile("unknown channel layout".into()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| HandlerError::NotASoundFile("unknown sample rate".into()))?;
    let total_frames = track.codec_params.n_frames.unwrap_or(0);

    let audio_format = AudioFormat {
        sample_rate,
        channels: channels as u16,
        container: container_from_codec_params(&track.codec_params),
        envelope: envelope_from_extension(path),
    };

    Ok(Box::new(SymphoniaReader {
        format,
        decoder,
        track_id: track.id,
        audio_format,
        total_frames,
        leftover: Vec::new(),
        channels,
    }))
}

impl SoundReader for SymphoniaReader {
    fn format(&self) -> AudioFormat {
        self.audio_format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read_frames(&mut self, out: &mut [f32], max_frames: usize) -> usize {
        let wanted = max_frames * self.channels;
        let mut produced = 0usize;

        // Drain whatever decoded-but-unconsumed samples are left from the
        // previous packet before pulling a new one.
        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(wanted);
            out[..take].copy_from_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            produced += take;
        }

        while produced < wanted {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(_)) => break, // end of stream
                Err(SymphoniaError::ResetRequired) => break,
                Err(_) => break,
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(_) => break,
            };

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            let samples = sample_buf.samples();

            let remaining = wanted - produced;
            let take = samples.len().min(remaining);
            out[produced..produced + take].copy_from_slice(&samples[..take]);
            produced += take;

            if take < samples.len() {
                self.leftover.extend_from_slice(&samples[take..]);
            }
        }

        produced / self.channels
    }
}

/// Decodes an entire file into memory (interleaved f32) with its channel
/// count. Used to load impulse responses, which are small enough to not
/// need the fragment-at-a-time streaming path.
pub fn read_all_samples(path: &Path) -> Result<(Vec<f32>, usize), HandlerError> {
    let mut reader = open_reader(path)?;
    let channels = reader.format().channels as usize;
    let mut samples = Vec::new();
    let mut chunk = vec![0.0f32; channels * 4096];
    loop {
        let frames = reader.read_frames(&mut chunk, 4096);
        if frames == 0 {
            break;
        }
        samples.extend_from_slice(&chunk[..frames * channels]);
    }
    Ok((samples, channels))
}

/// WAV output. Supports the two output variants the output-format
/// selection calls for: PCM16 and float, both host endian.
///
/// Hand-rolled rather than routed through `hound::WavWriter`: the RIFF
/// and `data` chunk sizes are only known once the whole stream has been
/// produced, but the conversion buffer this feeds is append-only and
/// never patches earlier bytes. The canonical 44-byte header is written
/// with a placeholder `0xFFFFFFFF` size field up front — advisory only,
/// same as a streaming WAV server that doesn't know the final length.
pub struct WavSoundWriter {
    float: bool,
    channels: u16,
    header_emitted: bool,
    sample_rate: u32,
}

const WAV_PLACEHOLDER_SIZE: u32 = 0xFFFF_FFFF;

impl WavSoundWriter {
    pub fn new(sample_rate: u32, channels: u16, float: bool) -> Self {
        Self {
            float,
            channels,
            header_emitted: false,
            sample_rate,
        }
    }

    fn bits_per_sample(&self) -> u16 {
        if self.float {
            32
        } else {
            16
        }
    }

    fn build_header(&self) -> Vec<u8> {
        let bits = self.bits_per_sample();
        let block_align = self.channels * (bits / 8);
        let byte_rate = self.sample_rate * block_align as u32;
        let format_tag: u16 = if self.float { 3 } else { 1 }; // WAVE_FORMAT_IEEE_FLOAT / PCM

        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&WAV_PLACEHOLDER_SIZE.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&format_tag.to_le_bytes());
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&bits.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&WAV_PLACEHOLDER_SIZE.to_le_bytes());
        header
    }
}

impl SoundWriter for WavSoundWriter {
    fn write_frames(&mut self, frames: &[f32], _channel_count: usize) -> Result<Vec<u8>, HandlerError> {
        let mut out = Vec::new();
        if !self.header_emitted {
            out.extend_from_slice(&self.build_header());
            self.header_emitted = true;
        }
        if self.float {
            for &sample in frames {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        } else {
            for &sample in frames {
                let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&scaled.to_le_bytes());
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>, HandlerError> {
        Ok(Vec::new())
    }
}

/// FLAC audio payload encoder, via `flacenc`. Produces only frame bytes —
/// `flac_header.rs` supplies the `fLaC` marker and metadata chain, so
/// the library's own header emission is deliberately discarded here via
/// the conversion buffer's write-gating callback.
pub struct FlacSoundWriter {
    sample_rate: u32,
    channels: usize,
    bits_per_sample: u32,
    block_size: usize,
    pending: Vec<i32>,
}

impl FlacSoundWriter {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            channels: channels as usize,
            bits_per_sample,
            block_size,
            pending: Vec::new(),
        }
    }

    fn encode_block(&self, block: &[i32]) -> Result<Vec<u8>, HandlerError> {
        use flacenc::component::BitRepr;

        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|(_, e)| HandlerError::EncoderOpenFailed(format!("{e:?}")))?;
        let source = flacenc::source::MemSource::from_samples(
            block,
            self.channels,
            self.bits_per_sample as usize,
            self.sample_rate as usize,
        );
        let stream = flacenc::encode_with_fixed_block_size(&config, source, self.block_size)
            .map_err(|e| HandlerError::EncoderOpenFailed(format!("{e:?}")))?;

        let mut sink = flacenc::bitsink::ByteSink::new();
        for frame in stream.frames() {
            frame
                .write(&mut sink)
                .map_err(|e| HandlerError::EncoderOpenFailed(format!("{e:?}")))?;
        }
        Ok(sink.into_inner())
    }
}

impl SoundWriter for FlacSoundWriter {
    fn write_frames(&mut self, frames: &[f32], _channel_count: usize) -> Result<Vec<u8>, HandlerError> {
        let scale = (1i64 << (self.bits_per_sample - 1)) as f32 - 1.0;
        self.pending
            .extend(frames.iter().map(|s| (s.clamp(-1.0, 1.0) * scale) as i32));

        let samples_per_block = self.block_size * self.channels;
        let mut out = Vec::new();
        while self.pending.len() >= samples_per_block {
            let block: Vec<i32> = self.pending.drain(..samples_per_block).collect();
            out.extend(self.encode_block(&block)?);
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>, HandlerError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let block = std::mem::take(&mut self.pending);
        self.encode_block(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trip_via_hound_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..100 {
            writer.write_sample((i % 10) as i16 * 1000).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, channels) = read_all_samples(&path).unwrap();
        assert_eq!(channels, 1);
        assert_eq!(samples.len(), 100);
    }

    #[test]
    fn wav_sound_writer_emits_header_on_first_write() {
        let mut writer = WavSoundWriter::new(44100, 2, false);
        let first = writer.write_frames(&[], 2).unwrap();
        assert_eq!(&first[0..4], b"RIFF");
        assert_eq!(&first[8..12], b"WAVE");
        assert_eq!(&first[36..40], b"data");

        let more = writer.write_frames(&[0.1, -0.1, 0.2, -0.2], 2).unwrap();
        assert_eq!(more.len(), 8); // 4 samples * 2 bytes (16-bit PCM)
        assert!(writer.finish().unwrap().is_empty());
    }

    #[test]
    fn flac_sound_writer_flushes_partial_trailing_block_on_finish() {
        let mut writer = FlacSoundWriter::new(8000, 1, 16, 64);
        // Fewer frames than one block: write_frames alone must produce nothing.
        let frames: Vec<f32> = (0..32).map(|i| (i as f32 / 32.0) - 0.5).collect();
        let mid = writer.write_frames(&frames, 1).unwrap();
        assert!(mid.is_empty());

        // finish() must flush the pending partial block as real encoded bytes.
        let tail = writer.finish().unwrap();
        assert!(!tail.is_empty());

        // A second finish() on an already-drained writer has nothing left to flush.
        assert!(writer.finish().unwrap().is_empty());
    }
}
