//! Remote source interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::RemoteDocument;
use crate::errors::Result;

/// Anything the sync core can pull meeting notes from.
///
/// Implementations own pagination, retry, backoff and rate limiting; the
/// core only sees an eventual success or a terminal error. Documents must
/// be yielded in stable creation order across calls.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Cheap connectivity probe, run before a sync starts.
    async fn test_connection(&self) -> Result<bool>;

    /// Fetch every document in the collection.
    async fn fetch_all(&self) -> Result<Vec<RemoteDocument>>;

    /// Fetch documents updated at or after the given timestamp.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteDocument>>;
}
