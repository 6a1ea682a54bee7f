//! End-to-end coverage of the façade: pass-through fidelity, the
//! end-of-file read shortcut, and cache deduplication under concurrent
//! opens.
use convolve_fs_core::Filesystem;
use std::io::Write;
use std::sync::Arc;
use std::thread;

#[test]
fn test_non_audio_file_round_trips_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let mut contents = b"hello".to_vec();
    contents.resize(1024, 0);
    std::fs::write(&path, &contents).unwrap();

    let fs = Filesystem::initialize(dir.path());
    let handler = fs.create_handler("notes.txt", &path).unwrap();

    let mut buf = [0u8; 5];
    assert_eq!(fs.read(&handler, &mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(fs.stat(&handler).unwrap().size, 1024);

    let mut whole = vec![0u8; 1024];
    assert_eq!(fs.read(&handler, &mut whole, 0).unwrap(), 1024);
    assert_eq!(whole, contents);
}

#[test]
fn test_wav_without_filter_config_falls_back_and_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..500 {
        writer.write_sample((i % 77) as i16 * 50).unwrap();
    }
    writer.finalize().unwrap();
    let original = std::fs::read(&path).unwrap();

    // No filter-44100-16-2.conf in this empty config dir.
    let fs = Filesystem::initialize(dir.path());
    let handler = fs.create_handler("tone.wav", &path).unwrap();

    let mut buf = vec![0u8; original.len()];
    assert_eq!(fs.read(&handler, &mut buf, 0).unwrap(), original.len());
    assert_eq!(buf, original);
    assert_eq!(fs.stat(&handler).unwrap().size, original.len() as u64);
}

#[test]
fn test_wav_with_config_serves_header_and_end_of_file_skip_shortcut() {
    let dir = tempfile::tempdir().unwrap();
    let ir_path = dir.path().join("ir.wav");
    let ir_spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut ir_writer = hound::WavWriter::create(&ir_path, ir_spec).unwrap();
    ir_writer.write_sample(1.0f32).unwrap();
    ir_writer.finalize().unwrap();

    let config_path = dir.path().join("filter-8000-16-1.conf");
    let mut f = std::fs::File::create(&config_path).unwrap();
    writeln!(f, "fragment=32").unwrap();
    writeln!(f, "in_channels=1").unwrap();
    writeln!(f, "out_channels=1").unwrap();
    writeln!(f, "ir={}", ir_path.to_str().unwrap()).unwrap();
    drop(f);

    let wav_path = dir.path().join("speech.wav");
    let wav_spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav_path, wav_spec).unwrap();
    for i in 0..3000 {
        writer.write_sample(((i % 40) * 200 - 4000) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let fs = Filesystem::initialize(dir.path());
    let handler = fs.create_handler("speech.wav", &wav_path).unwrap();

    let mut header = [0u8; 44];
    assert_eq!(fs.read(&handler, &mut header, 0).unwrap(), 44);
    assert_eq!(&header[0..4], b"RIFF");
    assert_eq!(&header[8..12], b"WAVE");

    // Probe the reported tail without having produced that many bytes yet;
    // the shortcut must return zeroes rather than blocking on the producer.
    let reported = fs.stat(&handler).unwrap().size;
    let probe_size = 16usize;
    let mut tail = vec![0xffu8; probe_size];
    let n = fs
        .read(&handler, &mut tail, reported - probe_size as u64)
        .unwrap();
    assert_eq!(n, probe_size);
    assert_eq!(tail, vec![0u8; probe_size]);
}

#[test]
fn test_concurrent_opens_of_same_path_dedupe_and_refcount() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.bin");
    std::fs::write(&path, vec![7u8; 4096]).unwrap();

    let fs = Arc::new(Filesystem::initialize(dir.path()));
    let mut threads = Vec::new();
    for _ in 0..8 {
        let fs = fs.clone();
        let path = path.clone();
        threads.push(thread::spawn(move || {
            let handler = fs.create_handler("shared.bin", &path).unwrap();
            let mut buf = [0u8; 16];
            fs.read(&handler, &mut buf, 0).unwrap();
            buf
        }));
    }
    for t in threads {
        let buf = t.join().unwrap();
        assert_eq!(buf, [7u8; 16]);
    }

    for _ in 0..8 {
        fs.close("shared.bin");
    }
    assert!(fs.stat_by_filename("shared.bin").is_err());
}
