//! Shared utilities for the TTA scheduler crates.
mod errors;
mod id;
mod idx;

pub use errors::{Error, TtaResult};
pub use id::Id;
pub use idx::{IndexRef, IndexedMap};
