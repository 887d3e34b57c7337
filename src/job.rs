use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BenchdError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "submitted" => Some(JobStatus::Submitted),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "submitted"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable job inputs. The parameters fully determine the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    pub git_remote: String,
    pub git_ref: String,
    /// Substring or regex over benchmark names, passed to the runner.
    pub tests_filter_expr: String,
    /// Per-benchmark time budget.
    pub bench_time: Duration,
    /// Keep the scratch directory after the run.
    pub skip_cleanup: bool,
    /// Whole-job budget enforced by the stale reaper, not the worker.
    pub timeout: Duration,
    pub label: String,
    pub worker_pool: String,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            git_remote: String::new(),
            git_ref: "main".to_string(),
            tests_filter_expr: ".*".to_string(),
            bench_time: Duration::from_secs(1),
            skip_cleanup: false,
            timeout: Duration::from_secs(3600),
            label: String::new(),
            worker_pool: String::new(),
        }
    }
}

/// Authoritative job record, JSON-encoded in the revisioned KV.
///
/// The status field is the single source of truth for the lifecycle; the
/// submit stream only carries pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub parameters: JobParameters,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub worker: String,
    pub reason: String,
}

impl JobRecord {
    pub fn new(parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            parameters,
            status: JobStatus::Submitted,
            created: Utc::now(),
            started: None,
            completed: None,
            worker: String::new(),
            reason: String::new(),
        }
    }

    /// Mark the record claimed by `worker`. Callers persist the change with
    /// the revision they loaded; a CAS conflict means the claim was lost.
    pub fn set_running(&mut self, worker: &str) {
        self.status = JobStatus::Running;
        self.started = Some(Utc::now());
        self.worker = worker.to_string();
    }

    /// Move to a terminal state, stamping `completed`.
    pub fn set_final_status(&mut self, status: JobStatus, reason: &str) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed = Some(Utc::now());
        self.reason = reason.to_string();
    }

    /// Wall-clock duration of the run, when both endpoints are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started, self.completed) {
            (Some(s), Some(c)) => Some(c - s),
            _ => None,
        }
    }

    /// A `Running` record whose worker stopped making progress before
    /// `timeout` elapsed is stale and eligible for reaping.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let Some(started) = self.started else {
            return false;
        };
        match chrono::Duration::from_std(self.parameters.timeout) {
            Ok(timeout) => now - started > timeout,
            Err(_) => false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<JobRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| BenchdError::Malformed(format!("job record: {e}")))
    }
}
