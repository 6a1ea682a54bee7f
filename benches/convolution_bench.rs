//! Throughput benchmarks for the partitioned convolution engine.
//!
//! Measures fragment processing time across channel counts and fragment
//! sizes, the two knobs a filter config actually exposes.
use convolve_fs_core::convolver::{Convolver, ConvolverConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io::Write;

fn write_identity_ir(dir: &std::path::Path, len: usize) -> std::path::PathBuf {
    let path = dir.join("ir.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..len {
        writer.write_sample(if i == 0 { 1.0 } else { 0.0 }).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn build_convolver(dir: &std::path::Path, fragment: usize, channels: usize) -> Convolver {
    let ir_path = write_identity_ir(dir, fragment * 4);
    let config_path = dir.join("filter.conf");
    let mut f = std::fs::File::create(&config_path).unwrap();
    writeln!(f, "fragment={fragment}").unwrap();
    writeln!(f, "in_channels={channels}").unwrap();
    writeln!(f, "out_channels={channels}").unwrap();
    writeln!(f, "ir={}", ir_path.to_str().unwrap()).unwrap();
    for ch in 0..channels {
        writeln!(f, "route={ch}:{ch}:0").unwrap();
    }
    drop(f);

    let config = ConvolverConfig::load(&config_path).unwrap();
    Convolver::new(&config).unwrap()
}

fn bench_stereo_fragment_sizes(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("convolve_stereo");
    for fragment in [256usize, 1024, 4096] {
        let mut convolver = build_convolver(dir.path(), fragment, 2);
        let input = vec![vec![0.1f32; fragment]; 2];
        let mut output = vec![vec![0.0f32; fragment]; 2];

        group.bench_with_input(BenchmarkId::from_parameter(fragment), &fragment, |b, _| {
            b.iter(|| {
                convolver.process(black_box(&input), black_box(&mut output));
            });
        });
    }
    group.finish();
}

fn bench_channel_counts(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("convolve_channels_at_1024");
    for channels in [1usize, 2, 6] {
        let mut convolver = build_convolver(dir.path(), 1024, channels);
        let input = vec![vec![0.1f32; 1024]; channels];
        let mut output = vec![vec![0.0f32; 1024]; channels];

        group.bench_with_input(BenchmarkId::from_parameter(channels), &channels, |b, _| {
            b.iter(|| {
                convolver.process(black_box(&input), black_box(&mut output));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stereo_fragment_sizes, bench_channel_counts);
criterion_main!(benches);
