//! SndFileHandler
//!
//! Decode -> SoundProcessor -> encode -> ConversionBuffer. This is the
//! largest handler variant: it picks an output format from the input's
//! envelope/container, wires the FLAC header splice or synthesis in
//! ahead of any encoded bytes, drives the convolution fragment-by-
//! fragment on demand, and reports a dynamically growing size estimate
//! while the conversion is still in flight.
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::codec::{self, FlacSoundWriter, SoundReader, SoundWriter, WavSoundWriter};
use crate::config::{AudioFormat, Envelope, FilterConfig, SampleContainer};
use crate::conversion_buffer::{ConversionBuffer, SoundSource};
use crate::error::HandlerError;
use crate::flac_header;
use crate::sound_processor::SoundProcessor;

use super::{FileHandler, Stat};

/// Size estimate is only trusted once the produced byte count passes
/// this fraction of the original file's size.
const SIZE_ESTIMATE_THRESHOLD_FACTOR: f64 = 0.4;
/// Deliberate over-report folded into the dynamic size estimate; safer
/// for clients than under-reporting.
const SIZE_ESTIMATE_PAD: u64 = 16_384;
/// Frame count per FLAC encoder block. Independent of the convolver's
/// own fragment size, which is dictated by the filter config instead.
const FLAC_ENCODE_BLOCK_FRAMES: usize = 4096;

/// State touched only while advancing the producer: the decoder, the
/// encoder, and the lazily-built convolution processor. Exclusive access
/// is already serialised by `ConversionBuffer`'s own advancing gate; the
/// mutex here is a belt-and-braces guarantee the type system can check.
struct Producer {
    reader: Box<dyn SoundReader>,
    writer: Box<dyn SoundWriter>,
    filter_config: FilterConfig,
    processor: Option<SoundProcessor>,
    frames_remaining: Arc<AtomicU64>,
    error: Arc<AtomicBool>,
}

impl Producer {
    fn step(&mut self, conversion_buffer: &ConversionBuffer) -> bool {
        if self.frames_remaining.load(Ordering::Acquire) == 0 {
            return false;
        }

        if self.processor.is_none() {
            match SoundProcessor::create(self.filter_config.clone()) {
                Some(p) => self.processor = Some(p),
                None => {
                    self.error.store(true, Ordering::Release);
                    return false;
                }
            }
        }
        let processor = self.processor.as_mut().expect("just created above");

        let frames_read = processor.fill_buffer(self.reader.as_mut());
        let fragment = processor.fragment_size();
        let out_channels = processor.out_channels();
        let produced = processor.write_processed(fragment).to_vec();

        match self.writer.write_frames(&produced, out_channels) {
            Ok(bytes) => conversion_buffer.sndfile_write_callback(&bytes),
            Err(_) => {
                self.error.store(true, Ordering::Release);
                return false;
            }
        }

        let remaining = self.frames_remaining.load(Ordering::Acquire);
        let remaining = remaining.saturating_sub(frames_read as u64);
        self.frames_remaining.store(remaining, Ordering::Release);

        if remaining == 0 {
            match self.writer.finish() {
                Ok(bytes) if !bytes.is_empty() => conversion_buffer.sndfile_write_callback(&bytes),
                Ok(_) => {}
                Err(_) => self.error.store(true, Ordering::Release),
            }
            return false;
        }

        true
    }
}

/// Thin handle implementing `SoundSource` over a `Mutex<Producer>`: the
/// mutex is only held for the duration of one `add_more_sound_data`
/// call, so threads blocked on already-available bytes in
/// `ConversionBuffer::read` never contend for it.
struct ProducerHandle<'a> {
    producer: &'a Mutex<Producer>,
    conversion_buffer: &'a ConversionBuffer,
}

impl SoundSource for ProducerHandle<'_> {
    fn add_more_sound_data(&mut self) -> bool {
        let mut guard = self.producer.lock().unwrap_or_else(|p| p.into_inner());
        guard.step(self.conversion_buffer)
    }
}

pub struct SndFileHandler {
    conversion_buffer: Arc<ConversionBuffer>,
    producer: Mutex<Producer>,
    error: Arc<AtomicBool>,
    frames_remaining: Arc<AtomicU64>,
    total_frames: u64,
    original_size: u64,
    size_estimate_threshold: u64,
    reported_size: AtomicU64,
    /// Held only so the underlying descriptor stays open for the
    /// handler's lifetime; `close()` drops it explicitly rather than
    /// waiting on the handler's own destruction.
    underlying: Mutex<Option<File>>,
}

impl SndFileHandler {
    /// Opens `path` as a sound file, resolves its filter config, picks an
    /// output format, and primes the conversion buffer's header bytes.
    /// Returns `HandlerError::NotASoundFile` or `NoFilterConfigured` for
    /// anything the caller should fall back to `PassThroughHandler` for.
    pub fn create(underlying: File, path: &Path, config_dir: &Path) -> Result<Self, HandlerError> {
        let reader = codec::open_reader(path)?;
        let input_format = reader.format();

        let filter_config = FilterConfig::resolve(config_dir, &input_format).ok_or(
            HandlerError::NoFilterConfigured {
                rate: input_format.sample_rate,
                bits: input_format.container.bits(),
                channels: input_format.channels,
            },
        )?;

        let original_size = underlying.metadata()?.len();
        let total_frames = reader.total_frames();

        let (output_format, writer): (AudioFormat, Box<dyn SoundWriter>) =
            select_output(&input_format);

        let conversion_buffer = Arc::new(ConversionBuffer::new());
        let copy_flac_header = input_format.envelope == Envelope::Flac;

        if copy_flac_header {
            let header = flac_header::splice_flac_header(path)?;
            conversion_buffer.append(&header);
        } else if output_format.envelope == Envelope::Flac {
            let header = flac_header::synthesize_minimal_header(
                output_format.sample_rate,
                output_format.channels,
                output_format.container.bits(),
            );
            conversion_buffer.append(&header);
        }
        // WAV output carries its own header as the first bytes `write_frames`
        // produces; no separate priming step needed here.
        conversion_buffer.mark_header_finished();

        let frames_remaining = Arc::new(AtomicU64::new(total_frames));
        let error = Arc::new(AtomicBool::new(false));

        let producer = Mutex::new(Producer {
            reader,
            writer,
            filter_config,
            processor: None,
            frames_remaining: frames_remaining.clone(),
            error: error.clone(),
        });

        Ok(Self {
            conversion_buffer,
            producer,
            error,
            frames_remaining,
            total_frames,
            original_size,
            size_estimate_threshold: (original_size as f64 * SIZE_ESTIMATE_THRESHOLD_FACTOR) as u64,
            reported_size: AtomicU64::new(original_size),
            underlying: Mutex::new(Some(underlying)),
        })
    }

    // Linear extrapolation from bytes produced so far; optimistic for
    // variable-bitrate output (FLAC), where the tail can compress
    // differently than the average seen up to `produced_frames`.
    fn compute_reported_size(&self) -> u64 {
        let file_size = self.conversion_buffer.file_size();
        let remaining = self.frames_remaining.load(Ordering::Acquire);
        let produced_frames = self.total_frames.saturating_sub(remaining);

        if file_size <= self.size_estimate_threshold || produced_frames == 0 {
            return self.reported_size.load(Ordering::Acquire);
        }

        let est = (self.total_frames as f64 / produced_frames as f64) * file_size as f64
            + SIZE_ESTIMATE_PAD as f64;
        let est = est as u64;

        let mut prev = self.reported_size.load(Ordering::Acquire);
        loop {
            let candidate = prev.max(est);
            if candidate == prev {
                return prev;
            }
            match self.reported_size.compare_exchange(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl FileHandler for SndFileHandler {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, i32> {
        if self.error.load(Ordering::Acquire) {
            return Err(-libc::EIO);
        }

        let reported = self.compute_reported_size();
        let size = buf.len() as u64;

        // End-of-file skip shortcut: tolerate clients probing the tail to
        // confirm end-of-file without driving the producer any further.
        if offset > self.conversion_buffer.file_size() && offset + size == reported {
            buf.fill(0);
            return Ok(buf.len());
        }

        let mut handle = ProducerHandle {
            producer: &self.producer,
            conversion_buffer: &self.conversion_buffer,
        };
        let n = self.conversion_buffer.read(&mut handle, buf, offset, buf.len());
        Ok(n)
    }

    fn stat(&self) -> Result<Stat, i32> {
        Ok(Stat {
            size: self.compute_reported_size(),
        })
    }

    fn close(&self) {
        self.conversion_buffer.set_sndfile_writes_enabled(false);
        self.error.store(true, Ordering::Release);
        // Decoder and encoder are dropped along with `producer`'s lock
        // guard at handler destruction; only the underlying descriptor
        // needs an explicit, ahead-of-drop close here.
        if let Ok(mut guard) = self.underlying.lock() {
            guard.take();
        }
    }
}

/// Picks the output envelope/container for a given input format: OGG
/// always re-encodes to FLAC/PCM16 (not streamable back to OGG), WAV
/// stays WAV (float if not already PCM16, a known-buggy encoder path in
/// practice), and everything else — FLAC included — round-trips in its
/// own envelope and container.
fn select_output(input: &AudioFormat) -> (AudioFormat, Box<dyn SoundWriter>) {
    match (input.envelope, input.container) {
        (Envelope::Ogg, _) => {
            let output = AudioFormat {
                sample_rate: input.sample_rate,
                channels: input.channels,
                container: SampleContainer::Pcm16,
                envelope: Envelope::Flac,
            };
            let writer = FlacSoundWriter::new(
                output.sample_rate,
                output.channels,
                16,
                FLAC_ENCODE_BLOCK_FRAMES,
            );
            (output, Box::new(writer))
        }
        (Envelope::Wav, SampleContainer::Pcm16) => {
            let output = *input;
            let writer = WavSoundWriter::new(output.sample_rate, output.channels, false);
            (output, Box::new(writer))
        }
        (Envelope::Wav, _) => {
            let output = AudioFormat {
                container: SampleContainer::Float32,
                ..*input
            };
            let writer = WavSoundWriter::new(output.sample_rate, output.channels, true);
            (output, Box::new(writer))
        }
        (Envelope::Flac, _) => {
            let output = *input;
            let writer = FlacSoundWriter::new(
                output.sample_rate,
                output.channels,
                output.container.bits(),
                FLAC_ENCODE_BLOCK_FRAMES,
            );
            (output, Box::new(writer))
        }
    }
}
