//! Filesystem-backed broker backend.
//!
//! Lets the CLI, workers, and the web surface on one host (or a shared
//! volume) cooperate without an external broker. Layout under the root:
//!
//! ```text
//! streams/<name>/msgs/<seq>     headers document per message
//! streams/<name>/dedup/<id>     dedup markers
//! streams/<name>/claims/<seq>   claim markers, expired by mtime
//! streams/<name>/acks/<seq>     ack markers
//! kv/<key>                      {revision, value} documents
//! blobs/<key>                   raw artifact bytes
//! ```
//!
//! Appends and claims serialize between processes through `create_new`;
//! the KV compare-and-swap is advisory across processes racing within one
//! read-modify-write window. KV values must be UTF-8 (job records are
//! JSON).

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::broker::{
    BlobStore, Broker, Delivery, KvEntry, RecordStore, StreamInfo, StreamMessage, SubmitStream,
    HEADER_DEDUP_ID,
};
use crate::error::{BenchdError, Result};

const CLAIM_POLL: Duration = Duration::from_millis(50);

pub struct FsBroker {
    root: PathBuf,
    ack_wait: Duration,
}

impl FsBroker {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_ack_wait(root, Duration::from_secs(300))
    }

    pub fn with_ack_wait(root: impl Into<PathBuf>, ack_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            ack_wait,
        })
    }
}

impl Broker for FsBroker {
    fn stream(&self, name: &str) -> Arc<dyn SubmitStream> {
        Arc::new(FsStream {
            dir: self.root.join("streams").join(name),
            ack_wait: self.ack_wait,
        })
    }

    fn records(&self) -> Arc<dyn RecordStore> {
        Arc::new(FsRecordStore {
            dir: self.root.join("kv"),
        })
    }

    fn blobs(&self) -> Arc<dyn BlobStore> {
        Arc::new(FsBlobStore {
            dir: self.root.join("blobs"),
        })
    }
}

fn seq_file_name(seq: u64) -> String {
    format!("{seq:020}")
}

async fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, dir.join(name)).await?;
    Ok(())
}

/// Create `path` exclusively with `contents`. Ok(false) when it exists.
async fn create_marker(path: &Path, contents: &[u8]) -> Result<bool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(mut file) => {
            file.write_all(contents).await?;
            Ok(true)
        }
        Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Sorted sequence numbers currently retained in `dir`.
async fn list_seqs(dir: &Path) -> Result<Vec<u64>> {
    let mut seqs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(seqs),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Ok(seq) = entry.file_name().to_string_lossy().parse::<u64>() {
            seqs.push(seq);
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    headers: HashMap<String, String>,
}

struct FsStream {
    dir: PathBuf,
    ack_wait: Duration,
}

impl FsStream {
    fn msgs(&self) -> PathBuf {
        self.dir.join("msgs")
    }

    async fn try_claim(&self, seq: u64) -> Result<bool> {
        let claim = self.dir.join("claims").join(seq_file_name(seq));
        if create_marker(&claim, b"").await? {
            return Ok(true);
        }
        // An existing claim older than the ack deadline is abandoned.
        let stale = match tokio::fs::metadata(&claim).await {
            Ok(meta) => meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .is_some_and(|age| age > self.ack_wait),
            Err(e) if e.kind() == IoErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if !stale {
            return Ok(false);
        }
        let _ = tokio::fs::remove_file(&claim).await;
        create_marker(&claim, b"").await
    }
}

#[async_trait]
impl SubmitStream for FsStream {
    async fn append(&self, headers: HashMap<String, String>) -> Result<u64> {
        if let Some(dedup) = headers.get(HEADER_DEDUP_ID) {
            let marker = self.dir.join("dedup").join(dedup);
            if !create_marker(&marker, b"").await? {
                return Err(BenchdError::Conflict(format!(
                    "duplicate submission {dedup}"
                )));
            }
        }
        let doc = serde_json::to_vec(&StoredMessage { headers })?;
        let mut seq = list_seqs(&self.msgs()).await?.last().copied().unwrap_or(0) + 1;
        loop {
            let path = self.msgs().join(seq_file_name(seq));
            if create_marker(&path, &doc).await? {
                return Ok(seq);
            }
            seq += 1;
        }
    }

    async fn get(&self, seq: u64) -> Result<StreamMessage> {
        let path = self.msgs().join(seq_file_name(seq));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(BenchdError::NotFound(format!("stream message {seq}")))
            }
            Err(e) => return Err(e.into()),
        };
        let stored: StoredMessage = serde_json::from_slice(&bytes)?;
        Ok(StreamMessage {
            seq,
            headers: stored.headers,
        })
    }

    async fn info(&self) -> Result<StreamInfo> {
        let seqs = list_seqs(&self.msgs()).await?;
        Ok(StreamInfo {
            messages: seqs.len() as u64,
            first_seq: seqs.first().copied().unwrap_or(0),
            last_seq: seqs.last().copied().unwrap_or(0),
        })
    }

    async fn next(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            for seq in list_seqs(&self.msgs()).await? {
                let acked = self.dir.join("acks").join(seq_file_name(seq));
                match tokio::fs::metadata(&acked).await {
                    Ok(_) => continue,
                    Err(e) if e.kind() == IoErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                if self.try_claim(seq).await? {
                    let msg = match self.get(seq).await {
                        Ok(msg) => msg,
                        // Purged between listing and claim.
                        Err(BenchdError::NotFound(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    return Ok(Some(Delivery {
                        seq,
                        headers: msg.headers,
                    }));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CLAIM_POLL.min(wait)).await;
        }
    }

    async fn ack(&self, seq: u64) -> Result<()> {
        let ack = self.dir.join("acks").join(seq_file_name(seq));
        create_marker(&ack, b"").await?;
        let claim = self.dir.join("claims").join(seq_file_name(seq));
        match tokio::fs::remove_file(&claim).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    revision: u64,
    value: String,
}

struct FsRecordStore {
    dir: PathBuf,
}

impl FsRecordStore {
    async fn read_entry(&self, key: &str) -> Result<Option<StoredEntry>> {
        let bytes = match tokio::fs::read(self.dir.join(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write_entry(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        write_atomic(&self.dir, key, &serde_json::to_vec(entry)?).await
    }
}

fn utf8_value(value: Vec<u8>) -> Result<String> {
    String::from_utf8(value).map_err(|_| BenchdError::Malformed("non-UTF-8 KV value".to_string()))
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        if self.read_entry(key).await?.is_some() {
            return Err(BenchdError::Conflict(format!("key {key} already exists")));
        }
        let entry = StoredEntry {
            revision: 1,
            value: utf8_value(value)?,
        };
        self.write_entry(key, &entry).await?;
        Ok(1)
    }

    async fn get(&self, key: &str) -> Result<KvEntry> {
        let entry = self
            .read_entry(key)
            .await?
            .ok_or_else(|| BenchdError::NotFound(format!("key {key}")))?;
        Ok(KvEntry {
            key: key.to_string(),
            value: entry.value.into_bytes(),
            revision: entry.revision,
        })
    }

    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64> {
        let current = self
            .read_entry(key)
            .await?
            .ok_or_else(|| BenchdError::NotFound(format!("key {key}")))?;
        if current.revision != expected_revision {
            return Err(BenchdError::Conflict(format!(
                "key {key}: expected revision {expected_revision}, found {}",
                current.revision
            )));
        }
        let entry = StoredEntry {
            revision: expected_revision + 1,
            value: utf8_value(value)?,
        };
        self.write_entry(key, &entry).await?;
        Ok(entry.revision)
    }

    async fn snapshot(&self) -> Result<Vec<KvEntry>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name().to_string_lossy().to_string();
            if name.starts_with(".tmp-") {
                continue;
            }
            match self.read_entry(&name).await {
                Ok(Some(entry)) => out.push(KvEntry {
                    key: name,
                    value: entry.value.into_bytes(),
                    revision: entry.revision,
                }),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %name, error = %e, "skipping unreadable KV entry");
                }
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

struct FsBlobStore {
    dir: PathBuf,
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        write_atomic(&self.dir, key, data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.dir.join(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(BenchdError::NotFound(format!("blob {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
