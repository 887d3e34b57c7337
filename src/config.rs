use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::fs::FsBroker;
use crate::broker::memory::MemoryBroker;
use crate::broker::Broker;
use crate::error::{BenchdError, Result};
use crate::queue::{Client, DEFAULT_QUEUE};

/// How to reach the broker backing a deployment.
///
/// Every KV, stream, and blob key is prefixed with `namespace` so multiple
/// deployments can share one broker; `queue` selects the submit stream
/// (one per worker pool).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// `mem:` for an in-process broker, otherwise a filesystem root
    /// (optionally as a `file://` URL).
    pub url: String,
    /// Credentials file handed to external broker backends; the bundled
    /// memory and filesystem backends ignore it.
    pub credentials: Option<PathBuf>,
    pub namespace: String,
    pub queue: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "mem:".to_string(),
            credentials: None,
            namespace: String::new(),
            queue: DEFAULT_QUEUE.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Environment defaults: `BENCHD_URL`, `BENCHD_CREDS`,
    /// `BENCHD_NAMESPACE`, `BENCHD_QUEUE`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("BENCHD_URL") {
            cfg.url = url;
        }
        if let Ok(creds) = std::env::var("BENCHD_CREDS") {
            cfg.credentials = Some(PathBuf::from(creds));
        }
        if let Ok(ns) = std::env::var("BENCHD_NAMESPACE") {
            cfg.namespace = ns;
        }
        if let Ok(queue) = std::env::var("BENCHD_QUEUE") {
            cfg.queue = queue;
        }
        cfg
    }

    pub fn open(&self) -> Result<Arc<dyn Broker>> {
        if self.url == "mem:" || self.url.starts_with("mem://") {
            return Ok(MemoryBroker::new());
        }
        let path = self.url.strip_prefix("file://").unwrap_or(&self.url);
        if path.is_empty() {
            return Err(BenchdError::Malformed(format!(
                "broker url {:?} has no path",
                self.url
            )));
        }
        Ok(FsBroker::new(path))
    }

    pub fn client(&self) -> Result<Client> {
        let broker = self.open()?;
        Ok(Client::new(broker.as_ref(), &self.namespace, &self.queue))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identity, recorded on claimed jobs.
    pub id: String,
    pub scratch_root: PathBuf,
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
        let short = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self {
            id: format!("{host}-{short}"),
            scratch_root: std::env::temp_dir().join("benchd"),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub listen_addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().expect("static addr"),
        }
    }
}
