//! Adapters layer - implementations of the domain ports.
//!
//! - `fs`: JSON files under the state directory (the daemon's default)
//! - `memory`: in-process stores, lease registry and a fake process table
//! - `process`: Unix pid-file and signal based process control

pub mod fs;
pub mod memory;
pub mod process;
