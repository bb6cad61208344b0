//! filesync library
//!
//! Incremental one-way file synchronization over SFTP, FTP and FTPS, driven
//! by a local manifest and a modification-time checkpoint.

pub mod config;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod sync;
pub mod transfer;
pub mod trust;
pub mod utils;

// Re-export commonly used types
pub use config::SyncConfig;
pub use executor::TransferExecutor;
pub use remote::{Protocol, RemoteSession};
pub use trust::TrustVerifier;
pub use utils::errors::{Result, SyncError};
