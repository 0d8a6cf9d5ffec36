//! A thin, portable wrapper over a host-created named kernel semaphore.
//!
//! The child only ever opens a semaphore whose name was handed to it
//! through the bundle's `KVPairs` (e.g. `SEMAPHORE_NAME`); it never
//! creates or unlinks one; that is the host's responsibility.

mod error;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use error::SemaphoreError;

#[cfg(unix)]
pub use unix::NamedSemaphore;
#[cfg(windows)]
pub use windows::NamedSemaphore;
