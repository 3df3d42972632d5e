//! Storage module for the contact cache and session snapshots.

mod contacts;
mod snapshot;

pub use contacts::*;
pub use snapshot::*;
