//! Transfer accounting shared by push and clone passes.

pub mod progress;
