//! Local filesystem access: tree walking and file stamps.

pub mod metadata;
pub mod walker;

pub use walker::{scan, WalkOptions};
