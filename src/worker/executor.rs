use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{Delivery, HEADER_JOB_ID};
use crate::error::Result;
use crate::job::{JobParameters, JobRecord, JobStatus};
use crate::queue::Client;
use crate::worker::script::render_script;

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(2);

/// How a job run ended.
enum RunEnd {
    /// The subprocess exited on its own.
    Exited(std::process::ExitStatus),
    /// Another actor moved the record to a terminal state; the subprocess
    /// was killed and the terminal transition belongs to them.
    Superseded,
    /// The worker is shutting down.
    Interrupted,
}

struct RunOutcome {
    superseded: bool,
    success: bool,
    reason: String,
    script: String,
    log: Vec<u8>,
    results: Vec<u8>,
}

pub struct Worker {
    client: Client,
    id: String,
    scratch_root: PathBuf,
    heartbeat_interval: Duration,
    poll_wait: Duration,
    shutdown: CancellationToken,
    script_builder: fn(&JobParameters) -> String,
}

impl Worker {
    pub fn new(
        client: Client,
        id: impl Into<String>,
        scratch_root: impl Into<PathBuf>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            id: id.into(),
            scratch_root: scratch_root.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT,
            poll_wait: DEFAULT_POLL_WAIT,
            shutdown,
            script_builder: render_script,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Substitute the script generator; tests use this to run a stub
    /// workload instead of a real clone-and-bench cycle.
    pub fn with_script_builder(mut self, builder: fn(&JobParameters) -> String) -> Self {
        self.script_builder = builder;
        self
    }

    /// Consume submissions until the shutdown token fires.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(worker = %self.id, scratch = %self.scratch_root.display(), "worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                processed = self.process_next(self.poll_wait) => {
                    if let Err(e) = processed {
                        tracing::error!(worker = %self.id, error = %e, "job processing failed");
                    }
                }
            }
        }
        tracing::info!(worker = %self.id, "worker stopped");
        Ok(())
    }

    /// Claim and handle at most one submission. Returns whether a message
    /// was claimed.
    pub async fn process_next(&self, wait: Duration) -> Result<bool> {
        match self.client.next_submission(wait).await? {
            Some(delivery) => {
                self.process(&delivery).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<()> {
        // Poison messages (no or bad job id) are acked and dropped.
        let Some(raw_id) = delivery.headers.get(HEADER_JOB_ID) else {
            tracing::warn!(seq = delivery.seq, "submission without job id header");
            return self.client.ack_submission(delivery.seq).await;
        };
        let id = match Uuid::parse_str(raw_id) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(seq = delivery.seq, raw_id = %raw_id, "submission with invalid job id");
                return self.client.ack_submission(delivery.seq).await;
            }
        };

        let (mut job, revision) = match self.client.load_job(id).await {
            Ok(loaded) => loaded,
            Err(e) if e.is_not_found() => {
                tracing::warn!(job_id = %id, "submission points at a missing record");
                return self.client.ack_submission(delivery.seq).await;
            }
            Err(e) => return Err(e),
        };

        // Cancelled, already handled, or redelivered after a crash.
        if job.status != JobStatus::Submitted {
            tracing::debug!(job_id = %id, status = %job.status, "skipping non-submitted job");
            return self.client.ack_submission(delivery.seq).await;
        }

        job.set_running(&self.id);
        let mut revision = match self.client.update_job(&job, revision).await {
            Ok(rev) => rev,
            Err(e) if e.is_conflict() => {
                tracing::debug!(job_id = %id, "lost claim race");
                return self.client.ack_submission(delivery.seq).await;
            }
            Err(e) => return Err(e),
        };
        tracing::info!(job_id = %id, worker = %self.id, "job claimed");

        let outcome = match self.execute(&mut job, &mut revision).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "job execution failed");
                RunOutcome {
                    superseded: false,
                    success: false,
                    reason: format!("worker error: {e}"),
                    script: (self.script_builder)(&job.parameters),
                    log: Vec::new(),
                    results: Vec::new(),
                }
            }
        };

        let mut upload_error = None;
        let uploads: [(&str, &[u8]); 3] = [
            ("results", &outcome.results),
            ("log", &outcome.log),
            ("script", outcome.script.as_bytes()),
        ];
        for (kind, data) in uploads {
            let res = match kind {
                "results" => self.client.upload_results_artifact(&job, data).await,
                "log" => self.client.upload_log_artifact(&job, data).await,
                _ => self.client.upload_script_artifact(&job, data).await,
            };
            if let Err(e) = res {
                tracing::error!(job_id = %id, artifact = kind, error = %e, "artifact upload failed");
                upload_error.get_or_insert(format!("failed to upload {kind} artifact: {e}"));
            }
        }

        if outcome.superseded {
            return self.client.ack_submission(delivery.seq).await;
        }

        let (status, reason) = match (outcome.success, upload_error) {
            (true, None) => (JobStatus::Succeeded, outcome.reason),
            (true, Some(upload)) => (JobStatus::Failed, upload),
            (false, _) => (JobStatus::Failed, outcome.reason),
        };
        job.set_final_status(status, &reason);
        match self.client.update_job(&job, revision).await {
            Ok(_) => {
                tracing::info!(job_id = %id, status = %status, reason = %reason, "job finished");
            }
            Err(e) if e.is_conflict() => {
                // The reaper or a canceller got there first.
                tracing::warn!(job_id = %id, "terminal transition lost to a concurrent actor");
            }
            Err(e) => return Err(e),
        }

        self.client.ack_submission(delivery.seq).await
    }

    /// Run the job script, heartbeating the record while it executes.
    async fn execute(&self, job: &mut JobRecord, revision: &mut u64) -> Result<RunOutcome> {
        let scratch = self.scratch_root.join(job.id.to_string());
        tokio::fs::create_dir_all(&scratch).await?;

        let script = (self.script_builder)(&job.parameters);
        tokio::fs::write(scratch.join("script.sh"), &script).await?;

        let log_path = scratch.join("log.txt");
        let log_file = std::fs::File::create(&log_path)?;
        let stderr_file = log_file.try_clone()?;

        let mut child = Command::new("sh")
            .arg("script.sh")
            .current_dir(&scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .spawn()?;

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // the first tick fires immediately

        let end = loop {
            tokio::select! {
                status = child.wait() => break RunEnd::Exited(status?),
                _ = heartbeat.tick() => {
                    match self.client.update_job(job, *revision).await {
                        Ok(rev) => *revision = rev,
                        Err(e) if e.is_conflict() => {
                            let (current, rev) = self.client.load_job(job.id).await?;
                            if current.status.is_terminal() {
                                tracing::info!(
                                    job_id = %job.id,
                                    status = %current.status,
                                    "record went terminal, stopping subprocess"
                                );
                                break RunEnd::Superseded;
                            }
                            *revision = rev;
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %job.id, error = %e, "heartbeat failed");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    tracing::warn!(job_id = %job.id, "shutdown during job execution");
                    break RunEnd::Interrupted;
                }
            }
        };

        if !matches!(end, RunEnd::Exited(_)) {
            // kill() also reaps the child.
            child.kill().await?;
        }

        let results = tokio::fs::read(scratch.join("results.txt"))
            .await
            .unwrap_or_default();
        let log = tokio::fs::read(&log_path).await.unwrap_or_default();
        if !job.parameters.skip_cleanup {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
        }

        let (superseded, success, reason) = match end {
            RunEnd::Exited(status) if status.success() => (false, true, "exit status 0".to_string()),
            RunEnd::Exited(status) => {
                let reason = match status.code() {
                    Some(code) => format!("exit status {code}"),
                    None => "terminated by signal".to_string(),
                };
                (false, false, reason)
            }
            RunEnd::Superseded => (true, false, String::new()),
            RunEnd::Interrupted => (false, false, "interrupted by worker shutdown".to_string()),
        };

        Ok(RunOutcome {
            superseded,
            success,
            reason,
            script,
            log,
            results,
        })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("scratch_root", &self.scratch_root)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}
