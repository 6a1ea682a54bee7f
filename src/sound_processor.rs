//! SoundProcessor
//!
//! Owns a configured convolver instance and a private interleaved
//! scratch buffer, and operates strictly on fixed-size fragments.
//! Clients alternate `fill_buffer` (decoder -> scratch) and
//! `write_processed` (scratch -> encoder), with `process` running the
//! convolver exactly once per fragment in between.
use rayon::prelude::*;

use crate::codec::SoundReader;
use crate::config::FilterConfig;
use crate::convolver::{Convolver, ConvolverConfig};

pub struct SoundProcessor {
    convolver: Convolver,
    filter_config: FilterConfig,
    fragment: usize,
    in_channels: usize,
    out_channels: usize,
    /// Interleaved scratch of size `fragment * max(in_channels, out_channels)`.
    scratch: Vec<f32>,
    /// Fill cursor, `0..=fragment`.
    fill_cursor: usize,
    /// Drain cursor. `None` means "needs `process()`".
    drain_cursor: Option<usize>,
    peak: f32,
}

impl SoundProcessor {
    /// Builds a zero-initialised convolver context from an already-resolved
    /// filter config. Returns `None` on any load failure.
    pub fn create(filter_config: FilterConfig) -> Option<Self> {
        let convolver_config = ConvolverConfig::load(filter_config.path()).ok()?;
        let convolver = Convolver::new(&convolver_config).ok()?;

        let fragment = convolver.fragment_size();
        let in_channels = convolver.in_channels();
        let out_channels = convolver.out_channels();
        let scratch_len = fragment * in_channels.max(out_channels);

        Some(Self {
            convolver,
            filter_config,
            fragment,
            in_channels,
            out_channels,
            scratch: vec![0.0; scratch_len],
            fill_cursor: 0,
            drain_cursor: None,
            peak: 0.0,
        })
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Reads up to `F - in` interleaved frames directly into the scratch
    /// at offset `in * Ci`, advances `in`. Precondition: `in < F`.
    pub fn fill_buffer(&mut self, reader: &mut dyn SoundReader) -> usize {
        assert!(self.fill_cursor < self.fragment, "fill_buffer called with full scratch");
        let max_frames = self.fragment - self.fill_cursor;
        let offset = self.fill_cursor * self.in_channels;
        let slice = &mut self.scratch[offset..offset + max_frames * self.in_channels];
        let frames_read = reader.read_frames(slice, max_frames);
        self.fill_cursor += frames_read;
        self.drain_cursor = None;
        frames_read
    }

    /// If `out == -1`, runs `process()`. Writes `n` interleaved frames
    /// from the scratch at offset `out * Co`; advances `out`. When
    /// `out == F`, resets `in = 0` for the next fill cycle.
    pub fn write_processed(&mut self, n: usize) -> &[f32] {
        if self.drain_cursor.is_none() {
            self.process();
        }
        let out = self.drain_cursor.expect("process() must set drain_cursor");
        assert!(out + n <= self.fragment, "write_processed overruns fragment");

        let offset = out * self.out_channels;
        let len = n * self.out_channels;
        let slice = &self.scratch[offset..offset + len];

        self.drain_cursor = Some(out + n);
        if out + n == self.fragment {
            self.fill_cursor = 0;
        }
        slice
    }

    /// Zero-fills any unfilled tail, deinterleaves into the convolver's
    /// per-channel planes, invokes the convolver, and re-interleaves its
    /// output back into the scratch buffer. Deinterleaving and the peak
    /// scan are independent per channel, so both run across Rayon's pool.
    fn process(&mut self) {
        if self.fill_cursor < self.fragment {
            let start = self.fill_cursor * self.in_channels;
            self.scratch[start..self.fragment * self.in_channels].fill(0.0);
        }

        let fragment = self.fragment;
        let in_channels = self.in_channels;
        let scratch = &self.scratch;
        let mut in_planes: Vec<Vec<f32>> = vec![vec![0.0; fragment]; in_channels];
        in_planes.par_iter_mut().enumerate().for_each(|(ch, plane)| {
            for (frame, sample) in plane.iter_mut().enumerate() {
                *sample = scratch[frame * in_channels + ch];
            }
        });

        let mut out_planes: Vec<Vec<f32>> = vec![vec![0.0; self.fragment]; self.out_channels];
        self.convolver.process(&in_planes, &mut out_planes);

        let channel_peaks: Vec<f32> = out_planes
            .par_iter()
            .map(|plane| plane.iter().fold(0.0f32, |acc, &s| acc.max(s.abs())))
            .collect();
        self.peak = channel_peaks.into_iter().fold(self.peak, f32::max);

        for frame in 0..self.fragment {
            for ch in 0..self.out_channels {
                self.scratch[frame * self.out_channels + ch] = out_planes[ch][frame];
            }
        }

        self.drain_cursor = Some(0);
    }

    /// Resets the convolver, cursors, and peak meter.
    pub fn reset(&mut self) {
        self.convolver.reset();
        self.fill_cursor = 0;
        self.drain_cursor = None;
        self.peak = 0.0;
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// True iff the config file's mtime matches the one captured at
    /// construction. Not wired into the handler path yet — reserved for
    /// a future processor-pool reuse scheme.
    pub fn config_still_up_to_date(&self) -> bool {
        self.filter_config.still_up_to_date()
    }
}
