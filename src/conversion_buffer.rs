//! ConversionBuffer
//!
//! The bridge between a pull-driven producer (an encoder, fed by
//! `SoundSource::add_more_sound_data`) and a positional-read consumer
//! (`read`). Bytes the encoder has already produced accumulate in an
//! append-only log; a read that runs past the log's current end blocks on
//! a condvar until the producer has advanced far enough, or signals end
//! of stream.
use std::sync::{Condvar, Mutex};

/// Implemented by whatever drives the encode side of a conversion — the
/// only thing `ConversionBuffer` knows about its producer. One call
/// should append some bytes via the buffer's `append`/`sndfile_write`
/// entry points and return `false` once there is nothing left to produce.
pub trait SoundSource: Send {
    fn add_more_sound_data(&mut self) -> bool;
}

struct Inner {
    log: Vec<u8>,
    header_finished: bool,
    eof: bool,
    /// Gates `sndfile_write`; false while a handler is composing its own
    /// header bytes directly via `append`.
    sndfile_writes_enabled: bool,
    /// True while a producer advance is in flight, serialising callers so
    /// at most one thread drives `add_more_sound_data` at a time.
    advancing: bool,
}

pub struct ConversionBuffer {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl ConversionBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                log: Vec::new(),
                header_finished: false,
                eof: false,
                sndfile_writes_enabled: true,
                advancing: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Appends raw bytes to the log and wakes any blocked readers.
    /// Used directly by handlers composing bytes outside of the codec's
    /// own write callback (e.g. the spliced FLAC header).
    pub fn append(&self, bytes: &[u8]) {
        let mut guard = self.lock();
        guard.log.extend_from_slice(bytes);
        self.condvar.notify_all();
    }

    /// Callback surface for the codec adapter's encoded-byte output.
    /// A no-op while `sndfile_writes_enabled` is false, so a handler can
    /// suppress the library's own header bytes while splicing in its own.
    pub fn sndfile_write_callback(&self, bytes: &[u8]) {
        let mut guard = self.lock();
        if !guard.sndfile_writes_enabled {
            return;
        }
        guard.log.extend_from_slice(bytes);
        self.condvar.notify_all();
    }

    pub fn set_sndfile_writes_enabled(&self, enabled: bool) {
        self.lock().sndfile_writes_enabled = enabled;
    }

    /// Marks the point up to which header bytes are considered final,
    /// e.g. once a handler has finished splicing a FLAC header in.
    pub fn mark_header_finished(&self) {
        self.lock().header_finished = true;
    }

    pub fn header_finished(&self) -> bool {
        self.lock().header_finished
    }

    /// Marks the stream as fully produced; wakes any blocked readers so
    /// they can observe a short read instead of blocking forever.
    pub fn mark_eof(&self) {
        let mut guard = self.lock();
        guard.eof = true;
        self.condvar.notify_all();
    }

    pub fn eof(&self) -> bool {
        self.lock().eof
    }

    /// Current length of the produced-so-far log.
    pub fn file_size(&self) -> u64 {
        self.lock().log.len() as u64
    }

    /// Blocking positional read. Drives `source` forward via
    /// `add_more_sound_data` until the log covers `[offset, offset+size)`
    /// or the source signals end of stream, then copies out whatever
    /// overlap exists. Returns the number of bytes copied into `buf`.
    pub fn read(&self, source: &mut dyn SoundSource, buf: &mut [u8], offset: u64, size: usize) -> usize {
        let mut guard = self.lock();
        let want_end = offset + size as u64;

        loop {
            if guard.log.len() as u64 >= want_end || guard.eof {
                break;
            }
            if guard.advancing {
                guard = self
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(|p| p.into_inner());
                continue;
            }
            guard.advancing = true;
            drop(guard);

            let produced_more = source.add_more_sound_data();

            guard = self.lock();
            guard.advancing = false;
            if !produced_more {
                log::warn!(target: "conversion_buffer", "producer exhausted at {} bytes", guard.log.len());
                guard.eof = true;
            }
            self.condvar.notify_all();
        }

        let len = guard.log.len() as u64;
        if offset >= len {
            return 0;
        }
        let available = (len - offset).min(size as u64) as usize;
        buf[..available].copy_from_slice(&guard.log[offset as usize..offset as usize + available]);
        available
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ConversionBuffer {
    fn default() -> Self {
        Self::new()
    }
}
