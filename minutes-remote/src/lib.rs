//! Remote side of the minutes sync engine
//!
//! This crate defines what a remote meeting note looks like once it has
//! been validated, the interface any remote source must implement, and a
//! file-backed source that reads a JSON export of the remote collection.

pub mod document;
pub mod errors;
pub mod json_export;
pub mod source;

pub use document::{DocumentSection, RawDocument, RemoteDocument};
pub use errors::{RemoteError, Result};
pub use json_export::JsonExportSource;
pub use source::RemoteSource;
