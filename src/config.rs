//! Audio Format and Filter Configuration
//!
//! `AudioFormat` names the (sample rate, channels, sample container,
//! envelope) tuple that together selects a filter config file.
//! `FilterConfig` is the path/mtime pair a `SoundProcessor` is built from;
//! see `convolver.rs` for the grammar the file itself contains.
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Sample container of a decoded/encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleContainer {
    Pcm16,
    Pcm24,
    Pcm32,
    Float32,
}

impl SampleContainer {
    /// Bit depth used when composing the filter config filename.
    pub fn bits(self) -> u16 {
        match self {
            SampleContainer::Pcm16 => 16,
            SampleContainer::Pcm24 => 24,
            SampleContainer::Pcm32 | SampleContainer::Float32 => 32,
        }
    }
}

/// Envelope (container format) of a sound file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Wav,
    Flac,
    Ogg,
}

/// Sample rate, channel count, sample container and envelope of a decoded
/// stream. Sample rate + channels + bit depth together select the filter
/// config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub container: SampleContainer,
    pub envelope: Envelope,
}

impl AudioFormat {
    /// Filename of the filter config file for this format, e.g.
    /// `filter-44100-16-2.conf`.
    pub fn filter_filename(&self) -> String {
        format!(
            "filter-{}-{}-{}.conf",
            self.sample_rate,
            self.container.bits(),
            self.channels
        )
    }
}

/// A filter config file path plus the modification time observed when it
/// was last read. Owned conceptually by the `SoundProcessor` built from it;
/// re-read whenever a new processor is constructed.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    path: PathBuf,
    mtime: SystemTime,
}

impl FilterConfig {
    /// Resolves `<config_dir>/filter-<rate>-<bits>-<channels>.conf` and
    /// captures its current mtime. Returns `None` if the file cannot be
    /// statted (caller treats this as "no filter configured").
    pub fn resolve(config_dir: &Path, format: &AudioFormat) -> Option<Self> {
        let path = config_dir.join(format.filter_filename());
        let mtime = std::fs::metadata(&path).ok()?.modified().ok()?;
        Some(Self { path, mtime })
    }

    /// Builds a `FilterConfig` from an already-known path, statting it for
    /// the current mtime. Used when a config path is supplied directly
    /// rather than composed from an `AudioFormat`.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let mtime = std::fs::metadata(&path).ok()?.modified().ok()?;
        Some(Self { path, mtime })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff the config file's current mtime still matches the one
    /// captured at construction. Backs
    /// `SoundProcessor::config_still_up_to_date`; not wired into the
    /// handler path yet — left as an extension point for a future
    /// processor pool.
    pub fn still_up_to_date(&self) -> bool {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|mtime| mtime == self.mtime)
            .unwrap_or(false)
    }
}
