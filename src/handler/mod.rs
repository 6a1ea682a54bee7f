//! FileHandler
//!
//! Abstract per-open handler exposing positional read/stat/close. Two
//! concrete variants live in `pass_through` and `sndfile`;
//! `FileHandlerCache` (in `crate::cache`) picks between them at open time
//! and owns them by reference count.
pub mod pass_through;
pub mod sndfile;

/// Subset of `stat(2)` this crate's callers actually need: a reported
/// size. The bridging layer (out of scope) is responsible for filling in
/// the rest of a real `struct stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
}

/// Positional read/stat/close surface shared by both handler variants.
/// Errors are negative POSIX errno values. Methods take `&self` rather
/// than `&mut self`: a single handler may be touched by multiple reader
/// threads at once, so any internal mutation is behind interior
/// mutability (mutexes/atomics) rather than exclusive borrowing.
pub trait FileHandler: Send + Sync {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, i32>;
    fn stat(&self) -> Result<Stat, i32>;
    fn close(&self);
}
