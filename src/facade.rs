//! Filesystem façade
//!
//! Thin glue an external FUSE bridge calls into: `initialize`,
//! `create_handler`, `read`, `stat`, `stat_by_filename`, `close`. Every
//! function here is a direct pass through to `FileHandlerCache` /
//! `FileHandler`, with no logic of its own beyond picking
//! `SndFileHandler` vs `PassThroughHandler` at open time.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{FileHandlerCache, HandlerRef};
use crate::error::HandlerError;
use crate::handler::pass_through::PassThroughHandler;
use crate::handler::sndfile::SndFileHandler;
use crate::handler::{FileHandler, Stat};

/// Owns the process-wide handler cache plus the configured-filter
/// directory every `SndFileHandler::create` call resolves
/// `filter-<rate>-<bits>-<channels>.conf` against. Constructed once via
/// `initialize` as an explicit singleton rather than ambient global state.
pub struct Filesystem {
    cache: FileHandlerCache,
    config_dir: PathBuf,
}

impl Filesystem {
    /// One-shot at process start.
    pub fn initialize(zita_config_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache: FileHandlerCache::new(),
            config_dir: zita_config_dir.into(),
        }
    }

    /// Opens `underlying_path` read-only, tries `SndFileHandler`, and
    /// falls back to `PassThroughHandler` for anything that isn't a
    /// recognised, filter-configured sound file. The resulting handler is
    /// cached under `fs_path` and a reference handed back to the caller.
    pub fn create_handler(
        &self,
        fs_path: &str,
        underlying_path: &Path,
    ) -> Result<HandlerRef, i32> {
        self.cache.get_or_create(fs_path, || {
            let underlying = File::open(underlying_path).map_err(|e| {
                -e.raw_os_error().unwrap_or(libc::ENOENT)
            })?;

            match SndFileHandler::create(
                underlying.try_clone().map_err(|e| -e.raw_os_error().unwrap_or(libc::EIO))?,
                underlying_path,
                &self.config_dir,
            ) {
                Ok(handler) => Ok(Arc::new(handler) as Arc<dyn FileHandler>),
                Err(HandlerError::NotASoundFile(reason)) => {
                    log::info!(target: "sndfile", "{fs_path} is not a sound file ({reason}), falling back to pass-through");
                    Ok(Arc::new(PassThroughHandler::new(underlying)) as Arc<dyn FileHandler>)
                }
                Err(HandlerError::NoFilterConfigured { rate, bits, channels }) => {
                    log::warn!(
                        target: "sndfile",
                        "no filter configured for {fs_path} ({rate} Hz / {bits}-bit / {channels}ch), falling back to pass-through"
                    );
                    Ok(Arc::new(PassThroughHandler::new(underlying)) as Arc<dyn FileHandler>)
                }
                Err(other) => {
                    log::error!(target: "sndfile", "failed to open convolving handler for {fs_path}: {other}");
                    Err(other.to_errno())
                }
            }
        })
    }

    /// Reads through whichever handler is already open for `handler_ref`.
    pub fn read(&self, handler_ref: &HandlerRef, buf: &mut [u8], offset: u64) -> Result<usize, i32> {
        handler_ref.handler.read(buf, offset)
    }

    /// `Stat(handler, ...)`: delegates straight to the handler, which may
    /// report a dynamically-growing size estimate.
    pub fn stat(&self, handler_ref: &HandlerRef) -> Result<Stat, i32> {
        handler_ref.handler.stat()
    }

    /// `StatByFilename`: used by callers that only have a path, not an
    /// open handler reference (e.g. a `stat(2)` on a path nobody has
    /// opened for reading yet). Falls back to `NotOpen` so the caller can
    /// stat the underlying file directly instead.
    pub fn stat_by_filename(&self, fs_path: &str) -> Result<Stat, i32> {
        self.cache
            .stat_by_filename(fs_path)
            .map_err(|_| -libc::ENOENT)
    }

    /// Decrements the refcount for `fs_path`; the final close releases
    /// the handler's resources.
    pub fn close(&self, fs_path: &str) {
        self.cache.close(fs_path);
    }
}
