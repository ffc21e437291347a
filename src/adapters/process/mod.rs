//! OS process control.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::{PidFileLocator, UnixProcess};
