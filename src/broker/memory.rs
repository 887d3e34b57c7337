//! In-process broker backend.
//!
//! Backs every integration test and single-process deployments. All state
//! lives in mutex-guarded maps; locks are never held across an await.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::broker::{
    BlobStore, Broker, Delivery, KvEntry, RecordStore, StreamInfo, StreamMessage, SubmitStream,
    HEADER_DEDUP_ID,
};
use crate::error::{BenchdError, Result};

const CLAIM_POLL: Duration = Duration::from_millis(10);

pub struct MemoryBroker {
    streams: Mutex<HashMap<String, Arc<MemoryStream>>>,
    records: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    ack_wait: Duration,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Self::with_ack_wait(Duration::from_secs(30))
    }

    /// Unacked claims become redeliverable after `ack_wait`.
    pub fn with_ack_wait(ack_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(HashMap::new()),
            records: Arc::new(MemoryRecordStore::default()),
            blobs: Arc::new(MemoryBlobStore::default()),
            ack_wait,
        })
    }

    /// The named stream, for test hooks not exposed through the port.
    pub fn memory_stream(&self, name: &str) -> Arc<MemoryStream> {
        let mut streams = self.streams.lock().unwrap();
        streams
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStream::new(self.ack_wait)))
            .clone()
    }
}

impl Broker for MemoryBroker {
    fn stream(&self, name: &str) -> Arc<dyn SubmitStream> {
        self.memory_stream(name)
    }

    fn records(&self) -> Arc<dyn RecordStore> {
        self.records.clone()
    }

    fn blobs(&self) -> Arc<dyn BlobStore> {
        self.blobs.clone()
    }
}

#[derive(Default)]
struct StreamState {
    last_seq: u64,
    messages: BTreeMap<u64, HashMap<String, String>>,
    dedup: HashSet<String>,
    /// Claimed but unacked sequences and their redelivery deadlines.
    pending: HashMap<u64, Instant>,
    acked: HashSet<u64>,
}

pub struct MemoryStream {
    state: Mutex<StreamState>,
    ack_wait: Duration,
}

impl MemoryStream {
    fn new(ack_wait: Duration) -> Self {
        Self {
            state: Mutex::new(StreamState::default()),
            ack_wait,
        }
    }

    /// Drop a retained message, leaving a gap in the sequence space. Models
    /// operator-side purges for listing tests.
    pub fn purge(&self, seq: u64) {
        let mut state = self.state.lock().unwrap();
        state.messages.remove(&seq);
    }

    fn try_claim(&self) -> Option<Delivery> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let mut found = None;
        for (&seq, _) in state.messages.iter() {
            if state.acked.contains(&seq) {
                continue;
            }
            if let Some(deadline) = state.pending.get(&seq) {
                if now < *deadline {
                    continue;
                }
            }
            found = Some(seq);
            break;
        }
        let seq = found?;
        let headers = state.messages.get(&seq).cloned()?;
        state.pending.insert(seq, now + self.ack_wait);
        Some(Delivery { seq, headers })
    }
}

#[async_trait]
impl SubmitStream for MemoryStream {
    async fn append(&self, headers: HashMap<String, String>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if let Some(dedup) = headers.get(HEADER_DEDUP_ID) {
            if !state.dedup.insert(dedup.clone()) {
                return Err(BenchdError::Conflict(format!(
                    "duplicate submission {dedup}"
                )));
            }
        }
        state.last_seq += 1;
        let seq = state.last_seq;
        state.messages.insert(seq, headers);
        Ok(seq)
    }

    async fn get(&self, seq: u64) -> Result<StreamMessage> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .get(&seq)
            .map(|headers| StreamMessage {
                seq,
                headers: headers.clone(),
            })
            .ok_or_else(|| BenchdError::NotFound(format!("stream message {seq}")))
    }

    async fn info(&self) -> Result<StreamInfo> {
        let state = self.state.lock().unwrap();
        let first_seq = state.messages.keys().next().copied().unwrap_or(0);
        let last_seq = state.messages.keys().next_back().copied().unwrap_or(0);
        Ok(StreamInfo {
            messages: state.messages.len() as u64,
            first_seq,
            last_seq,
        })
    }

    async fn next(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim() {
                return Ok(Some(delivery));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CLAIM_POLL.min(wait)).await;
        }
    }

    async fn ack(&self, seq: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.remove(&seq);
        state.acked.insert(seq);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    entries: Mutex<BTreeMap<String, (Vec<u8>, u64)>>,
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Err(BenchdError::Conflict(format!("key {key} already exists")));
        }
        entries.insert(key.to_string(), (value, 1));
        Ok(1)
    }

    async fn get(&self, key: &str) -> Result<KvEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .map(|(value, revision)| KvEntry {
                key: key.to_string(),
                value: value.clone(),
                revision: *revision,
            })
            .ok_or_else(|| BenchdError::NotFound(format!("key {key}")))
    }

    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let Some((stored, revision)) = entries.get_mut(key) else {
            return Err(BenchdError::NotFound(format!("key {key}")));
        };
        if *revision != expected_revision {
            return Err(BenchdError::Conflict(format!(
                "key {key}: expected revision {expected_revision}, found {revision}"
            )));
        }
        *stored = value;
        *revision += 1;
        Ok(*revision)
    }

    async fn snapshot(&self) -> Result<Vec<KvEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .map(|(key, (value, revision))| KvEntry {
                key: key.clone(),
                value: value.clone(),
                revision: *revision,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap();
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BenchdError::NotFound(format!("blob {key}")))
    }
}
