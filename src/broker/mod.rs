//! Ports over the external broker.
//!
//! The queue service only needs three capabilities from whatever messaging
//! system backs a deployment: an append-only ordered stream for submission
//! pointers, a revisioned key-value store for the authoritative job records,
//! and a blob store for artifacts. Each is an async trait so the rest of the
//! crate never sees a concrete backend.
//!
//! Two backends ship in-crate: [`memory`] for tests and single-process runs,
//! and [`fs`] for cross-process deployments on a shared filesystem.

pub mod fs;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Header carrying the job id on a submit-stream message.
pub const HEADER_JOB_ID: &str = "job-id";
/// Header used by the broker to reject duplicate submissions.
pub const HEADER_DEDUP_ID: &str = "dedup-id";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Number of messages currently retained.
    pub messages: u64,
    /// Lowest retained sequence, 0 when the stream is empty.
    pub first_seq: u64,
    /// Highest assigned sequence, 0 when the stream is empty.
    pub last_seq: u64,
}

/// A message looked up by sequence. Submit messages carry headers only.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub seq: u64,
    pub headers: HashMap<String, String>,
}

/// A message handed to a consumer, owed an explicit ack.
///
/// Unacked deliveries become redeliverable once the backend's ack deadline
/// passes, so consumers must tolerate seeing a message twice.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub headers: HashMap<String, String>,
}

/// Append-only totally-ordered message stream with at-most-once claims.
#[async_trait]
pub trait SubmitStream: Send + Sync {
    /// Append a headers-only message, returning its sequence. A repeated
    /// `dedup-id` header value is rejected with `Conflict`.
    async fn append(&self, headers: HashMap<String, String>) -> Result<u64>;

    /// Look up a message by sequence. Purged or never-assigned sequences
    /// return `NotFound`.
    async fn get(&self, seq: u64) -> Result<StreamMessage>;

    async fn info(&self) -> Result<StreamInfo>;

    /// Claim the next unacked message, waiting up to `wait` for one to
    /// become available. `None` when the wait elapses.
    async fn next(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// Acknowledge a claimed message so it is never redelivered.
    async fn ack(&self, seq: u64) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Revisioned key-value store. Revisions start at 1 and advance by exactly
/// one per successful update; concurrent writers serialize through the
/// expected-revision check.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a key, failing with `Conflict` if it already exists.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<KvEntry>;

    /// Compare-and-swap update; `Conflict` on revision mismatch.
    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64>;

    /// All live entries at a point in time. Consumers that need the
    /// watch-all contract open the snapshot and stop, which is sufficient
    /// for listings, histograms, and the stale reaper.
    async fn snapshot(&self) -> Result<Vec<KvEntry>>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// A backend bundling the three ports. Streams are named so that distinct
/// worker pools consume distinct submit subjects.
pub trait Broker: Send + Sync {
    fn stream(&self, name: &str) -> Arc<dyn SubmitStream>;
    fn records(&self) -> Arc<dyn RecordStore>;
    fn blobs(&self) -> Arc<dyn BlobStore>;
}
