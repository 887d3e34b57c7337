//! Queue service: the job lifecycle API over the broker ports.
//!
//! Submission writes the authoritative record to the KV first, then appends
//! a pointer-only message to the submit stream; every status transition is
//! a compare-and-swap against the record's revision. Listings walk the
//! stream (or a KV snapshot) and deliberately skip purged, headerless,
//! missing, or malformed entries so that operator-side cleanup never breaks
//! the read path.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::broker::{
    BlobStore, Broker, RecordStore, SubmitStream, HEADER_DEDUP_ID, HEADER_JOB_ID,
};
use crate::error::{BenchdError, Result};
use crate::job::{JobParameters, JobRecord, JobStatus};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStatus {
    pub submitted_count: u64,
}

/// Handle to one deployment's queue: a submit stream (one per worker pool),
/// the record KV, and the artifact blob store, all under a namespace prefix
/// so multiple deployments can share a broker.
#[derive(Clone)]
pub struct Client {
    stream: Arc<dyn SubmitStream>,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    namespace: String,
    queue: String,
}

impl Client {
    pub fn new(broker: &dyn Broker, namespace: &str, queue: &str) -> Self {
        let stream_name = if namespace.is_empty() {
            queue.to_string()
        } else {
            format!("{namespace}.{queue}")
        };
        Self {
            stream: broker.stream(&stream_name),
            records: broker.records(),
            blobs: broker.blobs(),
            namespace: namespace.to_string(),
            queue: queue.to_string(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    fn prefixed(&self, key: String) -> String {
        if self.namespace.is_empty() {
            key
        } else {
            format!("{}.{key}", self.namespace)
        }
    }

    fn record_key_prefix(&self) -> String {
        self.prefixed("jobs.".to_string())
    }

    fn record_key_of(&self, id: &str) -> String {
        self.prefixed(format!("jobs.{id}"))
    }

    fn record_key(&self, id: Uuid) -> String {
        self.record_key_of(&id.to_string())
    }

    fn artifact_key(&self, id: Uuid, kind: &str) -> String {
        self.prefixed(format!("artifacts.{id}.{kind}"))
    }

    /// Create the authoritative record, then publish the submission pointer.
    ///
    /// The dedup header makes the broker reject a reused job id. If the
    /// append fails after the KV create, the record is orphaned in
    /// `Submitted`; that is an operator-visible condition, not silent loss.
    pub async fn submit_job(&self, mut params: JobParameters) -> Result<JobRecord> {
        if params.worker_pool.is_empty() {
            params.worker_pool = self.queue.clone();
        }
        let job = JobRecord::new(params);

        self.records
            .create(&self.record_key(job.id), job.encode()?)
            .await?;

        let mut headers = HashMap::new();
        headers.insert(HEADER_JOB_ID.to_string(), job.id.to_string());
        headers.insert(HEADER_DEDUP_ID.to_string(), job.id.to_string());
        self.stream.append(headers).await?;

        tracing::info!(job_id = %job.id, queue = %self.queue, "job submitted");
        Ok(job)
    }

    /// Cancel a job that has not been claimed yet.
    ///
    /// Races with a claiming worker (or another canceller) resolve through
    /// the CAS: whoever loses observes a revision mismatch, reported here
    /// as `IllegalState`.
    pub async fn cancel_job(&self, id: Uuid) -> Result<()> {
        let (mut job, revision) = self.load_job(id).await?;
        if job.status != JobStatus::Submitted {
            return Err(BenchdError::IllegalState(format!(
                "cannot cancel job in state {}",
                job.status
            )));
        }
        job.set_final_status(JobStatus::Cancelled, "cancelled by operator");
        self.update_job(&job, revision).await.map_err(|e| {
            if e.is_conflict() {
                BenchdError::IllegalState(format!("job {id} was claimed or cancelled concurrently"))
            } else {
                e
            }
        })?;
        tracing::info!(job_id = %id, "job cancelled");
        Ok(())
    }

    pub async fn load_job(&self, id: Uuid) -> Result<(JobRecord, u64)> {
        let entry = self.records.get(&self.record_key(id)).await?;
        let job = JobRecord::decode(&entry.value)?;
        Ok((job, entry.revision))
    }

    /// CAS write of a record; the caller supplies the revision it loaded.
    pub async fn update_job(&self, job: &JobRecord, revision: u64) -> Result<u64> {
        self.records
            .update(&self.record_key(job.id), job.encode()?, revision)
            .await
    }

    /// Resolve a stream sequence to a decodable job record.
    ///
    /// Returns `None` for purged sequences, messages without a job-id
    /// header, KV misses, and undecodable records; every listing and the
    /// search index share this skip set so their offsets agree.
    async fn delivered_record(&self, seq: u64) -> Option<JobRecord> {
        let msg = self.stream.get(seq).await.ok()?;
        let job_id = msg.headers.get(HEADER_JOB_ID)?;
        let entry = self.records.get(&self.record_key_of(job_id)).await.ok()?;
        JobRecord::decode(&entry.value).ok()
    }

    /// Walk the submit stream in the requested direction, counting offset
    /// and limit in delivered records. Gaps in the sequence space are
    /// silently elided. `limit == 0` yields an empty listing.
    pub async fn load_jobs(&self, limit: usize, offset: usize, asc: bool) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        if limit == 0 {
            return Ok(jobs);
        }
        let info = self.stream.info().await?;
        if info.messages == 0 {
            return Ok(jobs);
        }

        let mut skipped = 0usize;
        let mut seq = if asc { info.first_seq } else { info.last_seq };
        loop {
            if asc {
                if seq > info.last_seq {
                    break;
                }
            } else if seq < info.first_seq || seq == 0 {
                break;
            }

            if let Some(job) = self.delivered_record(seq).await {
                if skipped < offset {
                    skipped += 1;
                } else {
                    jobs.push(job);
                    if jobs.len() >= limit {
                        break;
                    }
                }
            }

            if asc {
                seq += 1;
            } else {
                seq -= 1;
            }
        }
        Ok(jobs)
    }

    /// Newest-first listing.
    pub async fn load_recent_jobs(&self, limit: usize, offset: usize) -> Result<Vec<JobRecord>> {
        self.load_jobs(limit, offset, false).await
    }

    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let info = self.stream.info().await?;
        Ok(QueueStatus {
            submitted_count: info.messages,
        })
    }

    /// Find the ascending delivered offset of the newest record whose id,
    /// git ref, git remote, or tests filter contains `query`
    /// (case-insensitive). The returned offset positions the hit for a
    /// subsequent `load_jobs(_, offset, asc=true)` call.
    pub async fn find_job_offset(&self, query: &str) -> Result<Option<usize>> {
        if query.is_empty() {
            return Ok(None);
        }
        let info = self.stream.info().await?;
        if info.messages == 0 {
            return Ok(None);
        }

        let mut delivered = Vec::new();
        for seq in info.first_seq..=info.last_seq {
            if let Some(job) = self.delivered_record(seq).await {
                delivered.push(job);
            }
        }

        let query = query.to_lowercase();
        for (offset, job) in delivered.iter().enumerate().rev() {
            if job_matches(job, &query) {
                return Ok(Some(offset));
            }
        }
        Ok(None)
    }

    /// Listing served from a KV snapshot instead of the stream: filter by
    /// status set (empty set means all), sort by creation time descending,
    /// then page. Also returns the full status histogram from the scan.
    /// Here `limit == 0` means unlimited, which the status page relies on.
    pub async fn load_jobs_by_kv(
        &self,
        limit: usize,
        offset: usize,
        statuses: &[JobStatus],
    ) -> Result<(Vec<JobRecord>, BTreeMap<JobStatus, usize>)> {
        let mut counts = BTreeMap::new();
        let mut matched = Vec::new();

        for job in self.snapshot_records().await? {
            *counts.entry(job.status).or_insert(0) += 1;
            if statuses.is_empty() || statuses.contains(&job.status) {
                matched.push(job);
            }
        }

        matched.sort_by(|a, b| b.created.cmp(&a.created));

        if offset >= matched.len() {
            return Ok((Vec::new(), counts));
        }
        matched.drain(..offset);
        if limit > 0 && matched.len() > limit {
            matched.truncate(limit);
        }
        Ok((matched, counts))
    }

    pub async fn count_jobs_by_status(&self) -> Result<BTreeMap<JobStatus, usize>> {
        let mut counts = BTreeMap::new();
        for job in self.snapshot_records().await? {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Transition every timed-out `Running` record to `Failed`.
    ///
    /// Each candidate is re-loaded under its current revision before the
    /// write, so records that reached a terminal state between scan and
    /// update are skipped rather than clobbered. Per-record failures are
    /// logged and do not abort the sweep.
    pub async fn fail_stale_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let mut stale = Vec::new();
        let mut within_timeout = 0usize;
        for job in self.snapshot_records().await? {
            if job.status != JobStatus::Running {
                continue;
            }
            if job.is_stale(now) {
                stale.push(job.id);
            } else {
                within_timeout += 1;
            }
        }
        tracing::info!(
            stale = stale.len(),
            active = within_timeout,
            "scanned running jobs for stale reaping"
        );

        let mut updated = 0usize;
        for id in stale {
            let (mut job, revision) = match self.load_job(id).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "skipping stale candidate");
                    continue;
                }
            };
            if job.status != JobStatus::Running {
                continue;
            }
            job.set_final_status(JobStatus::Failed, "stale: exceeded timeout");
            match self.update_job(&job, revision).await {
                Ok(_) => {
                    tracing::info!(job_id = %id, "stale job failed");
                    updated += 1;
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "failed to reap stale job");
                }
            }
        }
        Ok(updated)
    }

    /// Decodable job records from a KV snapshot, scoped to this namespace.
    async fn snapshot_records(&self) -> Result<Vec<JobRecord>> {
        let prefix = self.record_key_prefix();
        let mut jobs = Vec::new();
        for entry in self.records.snapshot().await? {
            if !entry.key.starts_with(&prefix) {
                continue;
            }
            match JobRecord::decode(&entry.value) {
                Ok(job) => jobs.push(job),
                Err(_) => continue,
            }
        }
        Ok(jobs)
    }

    pub async fn upload_results_artifact(&self, job: &JobRecord, data: &[u8]) -> Result<()> {
        self.blobs.put(&self.artifact_key(job.id, "results"), data).await
    }

    pub async fn upload_log_artifact(&self, job: &JobRecord, data: &[u8]) -> Result<()> {
        self.blobs.put(&self.artifact_key(job.id, "log"), data).await
    }

    pub async fn upload_script_artifact(&self, job: &JobRecord, data: &[u8]) -> Result<()> {
        self.blobs.put(&self.artifact_key(job.id, "script"), data).await
    }

    pub async fn load_results_artifact(&self, job: &JobRecord, w: &mut (dyn Write + Send)) -> Result<()> {
        self.load_artifact(job, "results", w).await
    }

    pub async fn load_log_artifact(&self, job: &JobRecord, w: &mut (dyn Write + Send)) -> Result<()> {
        self.load_artifact(job, "log", w).await
    }

    pub async fn load_script_artifact(&self, job: &JobRecord, w: &mut (dyn Write + Send)) -> Result<()> {
        self.load_artifact(job, "script", w).await
    }

    async fn load_artifact(&self, job: &JobRecord, kind: &str, w: &mut (dyn Write + Send)) -> Result<()> {
        let bytes = self.blobs.get(&self.artifact_key(job.id, kind)).await?;
        w.write_all(&bytes)?;
        Ok(())
    }

    /// Claim the next submission pointer, waiting up to `wait`.
    pub async fn next_submission(&self, wait: std::time::Duration) -> Result<Option<crate::broker::Delivery>> {
        self.stream.next(wait).await
    }

    pub async fn ack_submission(&self, seq: u64) -> Result<()> {
        self.stream.ack(seq).await
    }
}

fn job_matches(job: &JobRecord, query_lower: &str) -> bool {
    let fields = [
        job.id.to_string(),
        job.parameters.git_ref.clone(),
        job.parameters.git_remote.clone(),
        job.parameters.tests_filter_expr.clone(),
    ];
    fields
        .iter()
        .any(|f| f.to_lowercase().contains(query_lower))
}
