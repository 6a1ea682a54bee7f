//! FLAC Metadata Splicing
//!
//! For FLAC input, the encoder's own header emission is bypassed: this
//! module walks the source file's metadata block chain directly and
//! rebuilds it for the output, zeroing the STREAMINFO MD5 (no longer
//! valid after convolution) and dropping the SEEKTABLE (seek offsets
//! would be wrong after re-encoding).
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::HandlerError;

const STREAMINFO: u8 = 0;
const PADDING: u8 = 1;
const SEEKTABLE: u8 = 3;
const STREAMINFO_LEN: usize = 34;

struct BlockHeader {
    is_last: bool,
    block_type: u8,
    length: usize,
}

fn read_block_header(src: &mut impl Read) -> std::io::Result<BlockHeader> {
    let mut header = [0u8; 4];
    src.read_exact(&mut header)?;
    let is_last = header[0] & 0x80 != 0;
    let block_type = header[0] & 0x7f;
    let length = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
    Ok(BlockHeader {
        is_last,
        block_type,
        length,
    })
}

fn write_block_header(out: &mut Vec<u8>, is_last: bool, block_type: u8, length: usize) {
    let first = (if is_last { 0x80 } else { 0x00 }) | (block_type & 0x7f);
    out.push(first);
    out.push(((length >> 16) & 0xff) as u8);
    out.push(((length >> 8) & 0xff) as u8);
    out.push((length & 0xff) as u8);
}

/// Builds the `fLaC` marker plus spliced metadata chain for `source_path`,
/// an already-confirmed FLAC file. Output starts with `fLaC`, STREAMINFO's
/// MD5 is zeroed, no SEEKTABLE survives, and exactly one block carries
/// the last-block flag.
pub fn splice_flac_header(source_path: &Path) -> Result<Vec<u8>, HandlerError> {
    let mut file = File::open(source_path)?;
    let mut marker = [0u8; 4];
    file.read_exact(&mut marker)?;
    if &marker != b"fLaC" {
        return Err(HandlerError::NotASoundFile(
            "missing fLaC marker".to_string(),
        ));
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"fLaC");

    let mut dropped_seektable_was_last = false;

    loop {
        let header = read_block_header(&mut file)?;
        let mut payload = vec![0u8; header.length];
        file.read_exact(&mut payload)?;

        match header.block_type {
            STREAMINFO if header.length == STREAMINFO_LEN => {
                write_block_header(&mut out, header.is_last, header.block_type, header.length);
                out.extend_from_slice(&payload[..18]);
                out.extend_from_slice(&[0u8; 16]); // MD5 invalid after convolution
            }
            SEEKTABLE => {
                dropped_seektable_was_last = header.is_last;
                // Block dropped entirely: seek offsets are wrong post-convolution.
            }
            _ => {
                write_block_header(&mut out, header.is_last, header.block_type, header.length);
                out.extend_from_slice(&payload);
            }
        }

        if header.is_last {
            break;
        }
    }

    if dropped_seektable_was_last {
        write_block_header(&mut out, true, PADDING, 0);
    }

    Ok(out)
}

/// Builds a minimal `fLaC` marker plus a single, last, STREAMINFO block
/// for output that has no source FLAC metadata chain to splice from (the
/// OGG-to-FLAC case in the output format table). MD5 is zeroed, matching
/// the same "invalid after convolution" convention as `splice_flac_header`.
pub fn synthesize_minimal_header(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"fLaC");

    let mut payload = vec![0u8; STREAMINFO_LEN];
    payload[0..2].copy_from_slice(&0u16.to_be_bytes()); // min block size unknown
    payload[2..4].copy_from_slice(&0u16.to_be_bytes()); // max block size unknown
    payload[4..7].fill(0); // min frame size unknown
    payload[7..10].fill(0); // max frame size unknown

    let packed_bits: u64 = ((sample_rate as u64) << 44)
        | (((channels as u64).saturating_sub(1) & 0x7) << 41)
        | (((bits_per_sample as u64).saturating_sub(1) & 0x1f) << 36);
    payload[10..18].copy_from_slice(&packed_bits.to_be_bytes());
    // payload[18..34] (MD5) already zeroed.

    write_block_header(&mut out, true, STREAMINFO, STREAMINFO_LEN);
    out.extend_from_slice(&payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_block(out: &mut Vec<u8>, is_last: bool, block_type: u8, payload: &[u8]) {
        write_block_header(out, is_last, block_type, payload.len());
        out.extend_from_slice(payload);
    }

    fn sample_streaminfo() -> Vec<u8> {
        let mut payload = vec![0u8; STREAMINFO_LEN];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        // Bytes 18..34 stand in for the MD5 signature.
        for b in payload[18..].iter_mut() {
            *b = 0xAB;
        }
        payload
    }

    fn make_flac(blocks: &[(bool, u8, Vec<u8>)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"fLaC");
        for (is_last, block_type, payload) in blocks {
            write_block(&mut bytes, *is_last, *block_type, payload);
        }
        bytes.extend_from_slice(b"\xff\xf8garbage_frame_bytes");
        bytes
    }

    #[test]
    fn splices_seektable_and_zeroes_md5() {
        let blocks = vec![
            (false, STREAMINFO, sample_streaminfo()),
            (false, SEEKTABLE, vec![0u8; 18]),
            (true, 4 /* VORBIS_COMMENT */, b"hello tag".to_vec()),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.flac");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&make_flac(&blocks))
            .unwrap();

        let spliced = splice_flac_header(&path).unwrap();
        assert_eq!(&spliced[0..4], b"fLaC");

        // First block: STREAMINFO, MD5 zeroed.
        assert_eq!(spliced[4] & 0x7f, STREAMINFO);
        let streaminfo_payload = &spliced[8..8 + STREAMINFO_LEN];
        assert_eq!(&streaminfo_payload[18..], &[0u8; 16]);

        // No SEEKTABLE block type anywhere in the spliced output.
        let mut pos = 4;
        let mut last_flags = 0;
        while pos < spliced.len() {
            let is_last = spliced[pos] & 0x80 != 0;
            let block_type = spliced[pos] & 0x7f;
            let len = ((spliced[pos + 1] as usize) << 16)
                | ((spliced[pos + 2] as usize) << 8)
                | spliced[pos + 3] as usize;
            assert_ne!(block_type, SEEKTABLE);
            if is_last {
                last_flags += 1;
            }
            pos += 4 + len;
            if is_last {
                break;
            }
        }
        assert_eq!(last_flags, 1);
    }

    #[test]
    fn synthesizes_padding_when_seektable_was_last() {
        let blocks = vec![
            (false, STREAMINFO, sample_streaminfo()),
            (true, SEEKTABLE, vec![0u8; 18]),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.flac");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&make_flac(&blocks))
            .unwrap();

        let spliced = splice_flac_header(&path).unwrap();
        // Second block after STREAMINFO should be a last, empty PADDING block.
        let second_block_offset = 4 + 4 + STREAMINFO_LEN;
        assert_eq!(spliced[second_block_offset] & 0x7f, PADDING);
        assert_eq!(spliced[second_block_offset] & 0x80, 0x80);
        let len = ((spliced[second_block_offset + 1] as usize) << 16)
            | ((spliced[second_block_offset + 2] as usize) << 8)
            | spliced[second_block_offset + 3] as usize;
        assert_eq!(len, 0);
    }

    #[test]
    fn synthesized_header_starts_with_marker_and_zero_md5() {
        let header = synthesize_minimal_header(44100, 2, 16);
        assert_eq!(&header[0..4], b"fLaC");
        assert_eq!(header[4] & 0x7f, STREAMINFO);
        assert_eq!(header[4] & 0x80, 0x80);
        let streaminfo = &header[8..8 + STREAMINFO_LEN];
        assert_eq!(&streaminfo[18..], &[0u8; 16]);
    }
}
