//! Local vault access for the minutes sync engine
//!
//! The vault is a directory of hand-editable markdown notes. This crate
//! provides the storage interface the sync core writes through, a
//! filesystem implementation of it, the note header conventions that tag
//! each file with its remote id, and per-path write locking.

pub mod errors;
pub mod fs;
pub mod locks;
pub mod note;
pub mod store;

pub use errors::{Result, VaultError};
pub use fs::FsVault;
pub use locks::PathLocks;
pub use store::{VaultEntry, VaultStore, WriteOutcome};
