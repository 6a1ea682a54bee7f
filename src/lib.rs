//! On-demand audio-convolution engine for a read-only virtual filesystem.
//!
//! A client opening a file under the mount either gets the underlying
//! bytes streamed unchanged, or, for a recognised sound file with a
//! filter configured, decode -> convolve -> re-encode -> positional read.
//! The FUSE bridge, CLI, HTML status page, and on-disk config-directory
//! layout are external collaborators; this crate is the core they call
//! into.
pub mod cache;
pub mod codec;
pub mod config;
pub mod conversion_buffer;
pub mod convolver;
pub mod error;
pub mod facade;
pub mod flac_header;
pub mod handler;
pub mod sound_processor;

pub use cache::{FileHandlerCache, HandlerRef};
pub use error::{CacheError, HandlerError};
pub use facade::Filesystem;
pub use handler::{FileHandler, Stat};
