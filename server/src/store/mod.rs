//! Durable storage of the sync state.

mod file;

pub use file::*;
