//! PassThroughHandler
//!
//! The fallback handler for anything that isn't a recognised, filter-
//! configured sound file: every operation delegates straight to the
//! underlying descriptor.
use std::fs::File;
use std::os::unix::fs::FileExt;

use super::{FileHandler, Stat};

pub struct PassThroughHandler {
    file: File,
}

impl PassThroughHandler {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl FileHandler for PassThroughHandler {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, i32> {
        self.file
            .read_at(buf, offset)
            .map_err(|e| -e.raw_os_error().unwrap_or(libc::EIO))
    }

    fn stat(&self) -> Result<Stat, i32> {
        self.file
            .metadata()
            .map(|m| Stat { size: m.len() })
            .map_err(|e| -e.raw_os_error().unwrap_or(libc::EIO))
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_returns_bytes_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"hello, world").unwrap();

        let handler = PassThroughHandler::new(File::open(&path).unwrap());
        let mut buf = [0u8; 5];
        let n = handler.read(&mut buf, 7).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn stat_reports_underlying_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sized.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&[0u8; 1024]).unwrap();
        drop(f);

        let handler = PassThroughHandler::new(File::open(&path).unwrap());
        assert_eq!(handler.stat().unwrap().size, 1024);
    }
}
