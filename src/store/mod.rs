//! Contracts for the collaborators the tracker talks to.
//!
//! The durable counter store and the identity provider live outside this
//! crate. The tracker only needs the narrow surface below; hosts plug in
//! whatever backend they have.

use std::collections::HashMap;
use std::future::Future;

use anyhow::Result;

use crate::models::{ContentType, OwnerId, TrackingKey};

pub mod identity;
pub mod memory;

pub use identity::StaticIdentity;
pub use memory::{CounterRow, IncrementCall, MemoryStore};

/// Resolves the learner the tracker is timing for.
pub trait IdentityProvider: Send + Sync + 'static {
    /// `Ok(None)` means nobody is signed in.
    fn current_owner(&self) -> impl Future<Output = Result<Option<OwnerId>>> + Send;
}

/// Per-(owner, content type, content id) second counters.
///
/// `increment` must be additive and safe to call concurrently for the same
/// key from several clients. The tracker never writes absolute totals.
pub trait CounterStore: Send + Sync + 'static {
    /// Stored total for one key, `None` when no row exists yet.
    fn read_total(
        &self,
        owner: &OwnerId,
        content_type: ContentType,
        content_id: &str,
    ) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Adds `delta_seconds` (> 0) to the key's total, creating the row if
    /// needed.
    fn increment(
        &self,
        owner: &OwnerId,
        key: &TrackingKey,
        delta_seconds: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Stored totals for many ids of one content type. Ids without a row are
    /// simply missing from the result.
    fn read_totals(
        &self,
        owner: &OwnerId,
        content_type: ContentType,
        content_ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, u64>>> + Send;
}
