//! Error Types for the Convolution Engine
//!
//! Structured errors for the handler/cache/facade layers, replacing
//! generic string errors with types a caller can branch on.
use thiserror::Error;

/// Errors raised while constructing or reading a convolving file handler.
///
/// Construction failures are meant to be recovered locally (fall back to
/// a simpler handler); runtime failures on an already-constructed
/// handler stick the handler in error state.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The decoder could not open the underlying descriptor as a sound file.
    #[error("not a sound file: {0}")]
    NotASoundFile(String),

    /// No `filter-<rate>-<bits>-<channels>.conf` exists for this format.
    #[error("no filter configured for {rate} Hz / {bits}-bit / {channels}ch")]
    NoFilterConfigured {
        rate: u32,
        bits: u16,
        channels: u16,
    },

    /// The output encoder failed to open. Fatal for the handler: it is
    /// kept alive (so `Close` still runs) but all reads return an error.
    #[error("encoder failed to open: {0}")]
    EncoderOpenFailed(String),

    /// Any other I/O failure against the underlying descriptor or the
    /// config/impulse-response files it depends on.
    #[error("I/O error: {0}")]
    UnderlyingIoError(#[from] std::io::Error),

    /// The convolver configuration could not be loaded (malformed grammar,
    /// missing impulse response, unbound channel).
    #[error("convolver configuration error: {0}")]
    ConvolverConfig(String),
}

impl HandlerError {
    /// Maps this error onto a negative POSIX errno, following standard
    /// POSIX convention.
    pub fn to_errno(&self) -> i32 {
        let code = match self {
            HandlerError::NotASoundFile(_) => libc::ENOENT,
            HandlerError::NoFilterConfigured { .. } => libc::ENOENT,
            HandlerError::EncoderOpenFailed(_) => libc::EIO,
            HandlerError::UnderlyingIoError(e) => e.raw_os_error().unwrap_or(libc::EIO),
            HandlerError::ConvolverConfig(_) => libc::EINVAL,
        };
        -code
    }
}

/// Errors surfaced by the cache/facade boundary.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `StatByFilename` was called for a path with no live handler.
    #[error("path not open: {0}")]
    NotOpen(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_negative() {
        assert!(HandlerError::NotASoundFile("x".into()).to_errno() < 0);
        assert_eq!(
            HandlerError::NoFilterConfigured {
                rate: 44100,
                bits: 16,
                channels: 2
            }
            .to_errno(),
            -libc::ENOENT
        );
    }

    #[test]
    fn io_error_preserves_errno() {
        let io = std::io::Error::from_raw_os_error(libc::ENOSPC);
        let err = HandlerError::UnderlyingIoError(io);
        assert_eq!(err.to_errno(), -libc::ENOSPC);
    }
}
