//! Partitioned Convolution Engine
//!
//! Consumes and produces per-channel float blocks of a fixed fragment
//! size: a uniformly partitioned, overlap-add FFT convolver over one or
//! more routed impulse responses.
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::read_all_samples;
use crate::error::HandlerError;

/// One `in_channel -> out_channel` route through a single impulse-response
/// channel, with its own partitioned IR and overlap carry.
struct Route {
    in_channel: usize,
    out_channel: usize,
    gain: f32,
    ir_partitions: Vec<Vec<Complex<f32>>>,
    overlap: Vec<f32>,
}

/// Parsed contents of a `filter-<rate>-<bits>-<channels>.conf` file.
///
/// Grammar (one `key=value` per line, `#` starts a comment):
///   fragment=<samples per block>
///   in_channels=<N>
///   out_channels=<N>
///   gain_db=<float>                  (optional, default 0.0)
///   ir=<path to impulse response>
///   route=<in>:<out>:<ir_channel>    (repeatable; default is diagonal)
pub struct ConvolverConfig {
    pub fragment: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    gain_db: f32,
    ir_path: PathBuf,
    routes: Vec<(usize, usize, usize)>,
}

impl ConvolverConfig {
    pub fn load(path: &Path) -> Result<Self, HandlerError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);

        let mut fragment = None;
        let mut in_channels = None;
        let mut out_channels = None;
        let mut gain_db = 0.0f32;
        let mut ir_path = None;
        let mut routes = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                HandlerError::ConvolverConfig(format!("malformed line: {line}"))
            })?;
            let value = value.trim();
            match key.trim() {
                "fragment" => fragment = value.parse().ok(),
                "in_channels" => in_channels = value.parse().ok(),
                "out_channels" => out_channels = value.parse().ok(),
                "gain_db" => gain_db = value.parse().unwrap_or(0.0),
                "ir" => ir_path = Some(path.with_file_name(value).canonicalize().unwrap_or_else(|_| PathBuf::from(value))),
                "route" => {
                    let parts: Vec<&str> = value.split(':').collect();
                    if parts.len() != 3 {
                        return Err(HandlerError::ConvolverConfig(format!(
                            "malformed route: {value}"
                        )));
                    }
                    let in_ch: usize = parts[0].parse().map_err(|_| {
                        HandlerError::ConvolverConfig(format!("bad route: {value}"))
                    })?;
                    let out_ch: usize = parts[1].parse().map_err(|_| {
                        HandlerError::ConvolverConfig(format!("bad route: {value}"))
                    })?;
                    let ir_ch: usize = parts[2].parse().map_err(|_| {
                        HandlerError::ConvolverConfig(format!("bad route: {value}"))
                    })?;
                    routes.push((in_ch, out_ch, ir_ch));
                }
                _ => {} // unrecognised keys are ignored
            }
        }

        let fragment = fragment
            .ok_or_else(|| HandlerError::ConvolverConfig("missing fragment".into()))?;
        let ir_path =
            ir_path.ok_or_else(|| HandlerError::ConvolverConfig("missing ir".into()))?;
        let in_channels = in_channels
            .ok_or_else(|| HandlerError::ConvolverConfig("missing in_channels".into()))?;
        let out_channels = out_channels
            .ok_or_else(|| HandlerError::ConvolverConfig("missing out_channels".into()))?;

        Ok(Self {
            fragment,
            in_channels,
            out_channels,
            gain_db,
            ir_path,
            routes,
        })
    }
}

/// A configured, fragment-sized partitioned convolver. Owns one `Route`
/// per configured `in_channel -> out_channel` mapping.
pub struct Convolver {
    fragment: usize,
    in_channels: usize,
    out_channels: usize,
    routes: Vec<Route>,
    /// Per-input-channel history of frequency-domain input blocks, shared
    /// across all routes reading that input channel.
    history: Vec<VecDeque<Vec<Complex<f32>>>>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
}

lazy_static::lazy_static! {
    /// Serialises FFT-planner construction, which is not thread-safe.
    /// Disjoint from the cache mutex so steady-state reads are never
    /// blocked by a concurrent processor build elsewhere.
    static ref PLANNER_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
}

impl Convolver {
    /// Builds a convolver from an already-loaded config. Holds the
    /// process-wide FFT-planner mutex for the entire load step.
    pub fn new(config: &ConvolverConfig) -> Result<Self, HandlerError> {
        let _guard = PLANNER_MUTEX.lock().unwrap_or_else(|p| p.into_inner());

        let fft_size = config.fragment * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        let (ir_samples, ir_channels) = read_all_samples(&config.ir_path)
            .map_err(|e| HandlerError::ConvolverConfig(format!("loading ir: {e}")))?;

        let routes_spec: Vec<(usize, usize, usize)> = if config.routes.is_empty() {
            // Default: diagonal routing, one IR channel per in/out pair.
            (0..config.in_channels.min(config.out_channels).min(ir_channels))
                .map(|c| (c, c, c))
                .collect()
        } else {
            config.routes.clone()
        };

        let gain = 10f32.powf(config.gain_db / 20.0);
        let mut routes = Vec::with_capacity(routes_spec.len());
        for (in_ch, out_ch, ir_ch) in &routes_spec {
            if *in_ch >= config.in_channels || *out_ch >= config.out_channels || *ir_ch >= ir_channels {
                return Err(HandlerError::ConvolverConfig(format!(
                    "route {in_ch}:{out_ch}:{ir_ch} not bound to a valid channel slot"
                )));
            }
            let ir_channel_samples: Vec<f32> = ir_samples
                .iter()
                .skip(*ir_ch)
                .step_by(ir_channels)
                .copied()
                .collect();
            let ir_partitions =
                partition_ir(&ir_channel_samples, config.fragment, fft_size, fft_forward.as_ref());
            routes.push(Route {
                in_channel: *in_ch,
                out_channel: *out_ch,
                gain,
                ir_partitions,
                overlap: vec![0.0; config.fragment],
            });
        }

        if routes.is_empty() {
            return Err(HandlerError::ConvolverConfig(
                "no channel routes bound to impulse response".into(),
            ));
        }

        let history = (0..config.in_channels).map(|_| VecDeque::new()).collect();

        log::info!(
            target: "convolver",
            "built convolver: fragment={} in={} out={} routes={}",
            config.fragment,
            config.in_channels,
            config.out_channels,
            routes.len()
        );

        Ok(Self {
            fragment: config.fragment,
            in_channels: config.in_channels,
            out_channels: config.out_channels,
            routes,
            history,
            fft_forward,
            fft_inverse,
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

    /// Resets all per-route overlap/history state, as if newly constructed.
    pub fn reset(&mut self) {
        for history in &mut self.history {
            history.clear();
        }
        for route in &mut self.routes {
            route.overlap.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    /// Convolves `in_planes` (one `Vec<f32>` of length `fragment` per input
    /// channel) into `out_planes` (one per output channel), accumulating
    /// contributions from every route that targets each output channel.
    pub fn process(&mut self, in_planes: &[Vec<f32>], out_planes: &mut [Vec<f32>]) {
        debug_assert_eq!(in_planes.len(), self.in_channels);
        debug_assert_eq!(out_planes.len(), self.out_channels);

        let fft_size = self.fragment * 2;
        let max_partitions = self
            .routes
            .iter()
            .map(|r| r.ir_partitions.len())
            .max()
            .unwrap_or(0);

        for (ch, plane) in in_planes.iter().enumerate() {
            let mut buf = vec![Complex::new(0.0, 0.0); fft_size];
            for (i, sample) in plane.iter().enumerate() {
                buf[i] = Complex::new(*sample, 0.0);
            }
            self.fft_forward.process(&mut buf);
            let history = &mut self.history[ch];
            history.push_front(buf);
            history.truncate(max_partitions.max(1));
        }

        for out in out_planes.iter_mut() {
            out.iter_mut().for_each(|s| *s = 0.0);
        }

        for route in &mut self.routes {
            let history = &self.history[route.in_channel];
            let mut sum = vec![Complex::new(0.0, 0.0); fft_size];
            for (partition, ir_fft) in history.iter().zip(route.ir_partitions.iter()) {
                for (acc, (a, b)) in sum.iter_mut().zip(partition.iter().zip(ir_fft.iter())) {
                    *acc += a * b;
                }
            }
            self.fft_inverse.process(&mut sum);

            let norm = 1.0 / fft_size as f32;
            let out = &mut out_planes[route.out_channel];
            for i in 0..self.fragment {
                let time_domain = sum[i].re * norm;
                out[i] += route.gain * (time_domain + route.overlap[i]);
                route.overlap[i] = sum[self.fragment + i].re * norm;
            }
        }
    }
}

/// Splits an impulse response into `fragment`-sized, zero-padded,
/// FFT'd partitions.
fn partition_ir(
    ir: &[f32],
    fragment: usize,
    fft_size: usize,
    fft_forward: &dyn Fft<f32>,
) -> Vec<Vec<Complex<f32>>> {
    let num_partitions = ir.len().div_ceil(fragment).max(1);
    let mut partitions = Vec::with_capacity(num_partitions);
    for p in 0..num_partitions {
        let start = p * fragment;
        let end = (start + fragment).min(ir.len());
        let mut buf = vec![Complex::new(0.0, 0.0); fft_size];
        for (i, sample) in ir[start..end].iter().enumerate() {
            buf[i] = Complex::new(*sample, 0.0);
        }
        fft_forward.process(&mut buf);
        partitions.push(buf);
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mono_wav(path: &Path, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn identity_impulse_passes_signal_through() {
        let dir = tempfile::tempdir().unwrap();
        let ir_path = dir.path().join("ir.wav");
        write_mono_wav(&ir_path, &[1.0]); // pure identity impulse

        let config_path = dir.path().join("filter.conf");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(f, "fragment=8").unwrap();
        writeln!(f, "in_channels=1").unwrap();
        writeln!(f, "out_channels=1").unwrap();
        writeln!(f, "ir={}", ir_path.to_str().unwrap()).unwrap();
        drop(f);

        let config = ConvolverConfig::load(&config_path).unwrap();
        let mut convolver = Convolver::new(&config).unwrap();

        let input = vec![vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]];
        let mut output = vec![vec![0.0; 8]];
        convolver.process(&input, &mut output);

        for i in 0..4 {
            assert!((output[0][i] - input[0][i]).abs() < 1e-4);
        }
    }

    #[test]
    fn reset_clears_overlap_state() {
        let dir = tempfile::tempdir().unwrap();
        let ir_path = dir.path().join("ir.wav");
        write_mono_wav(&ir_path, &[0.5, 0.5]);

        let config_path = dir.path().join("filter.conf");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(f, "fragment=4").unwrap();
        writeln!(f, "in_channels=1").unwrap();
        writeln!(f, "out_channels=1").unwrap();
        writeln!(f, "ir={}", ir_path.to_str().unwrap()).unwrap();
        drop(f);

        let config = ConvolverConfig::load(&config_path).unwrap();
        let mut convolver = Convolver::new(&config).unwrap();
        let input = vec![vec![1.0, 1.0, 1.0, 1.0]];
        let mut output = vec![vec![0.0; 4]];
        convolver.process(&input, &mut output);
        convolver.reset();
        assert_eq!(convolver.routes[0].overlap, vec![0.0; 4]);
    }
}
