use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use benchd::broker::fs::FsBroker;
use benchd::broker::{BlobStore, Broker, RecordStore, SubmitStream, HEADER_DEDUP_ID, HEADER_JOB_ID};
use benchd::error::BenchdError;
use benchd::job::{JobParameters, JobStatus};
use benchd::queue::Client;

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("benchd-fs-{}", Uuid::new_v4()))
}

fn headers(job_id: &str, dedup: &str) -> HashMap<String, String> {
    let mut h = HashMap::new();
    h.insert(HEADER_JOB_ID.to_string(), job_id.to_string());
    h.insert(HEADER_DEDUP_ID.to_string(), dedup.to_string());
    h
}

#[tokio::test]
async fn test_stream_append_get_info() {
    let root = temp_root();
    let broker = FsBroker::new(&root);
    let stream = broker.stream("default");

    let info = stream.info().await.unwrap();
    assert_eq!(info.messages, 0);

    let seq1 = stream.append(headers("a", "a")).await.unwrap();
    let seq2 = stream.append(headers("b", "b")).await.unwrap();
    assert_eq!(seq1, 1);
    assert_eq!(seq2, 2);

    let info = stream.info().await.unwrap();
    assert_eq!(info.messages, 2);
    assert_eq!(info.first_seq, 1);
    assert_eq!(info.last_seq, 2);

    let msg = stream.get(1).await.unwrap();
    assert_eq!(msg.headers.get(HEADER_JOB_ID).unwrap(), "a");

    let err = stream.get(99).await.unwrap_err();
    assert!(matches!(err, BenchdError::NotFound(_)));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_stream_rejects_duplicate_dedup_id() {
    let root = temp_root();
    let broker = FsBroker::new(&root);
    let stream = broker.stream("default");

    stream.append(headers("a", "same")).await.unwrap();
    let err = stream.append(headers("b", "same")).await.unwrap_err();
    assert!(matches!(err, BenchdError::Conflict(_)));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_stream_claim_ack_cycle() {
    let root = temp_root();
    let broker = FsBroker::new(&root);
    let stream = broker.stream("default");

    stream.append(headers("a", "a")).await.unwrap();

    let delivery = stream
        .next(Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.seq, 1);

    // Claimed but unacked: no redelivery within the ack window.
    assert!(stream.next(Duration::from_millis(100)).await.unwrap().is_none());

    stream.ack(1).await.unwrap();
    assert!(stream.next(Duration::from_millis(100)).await.unwrap().is_none());

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_stream_redelivers_abandoned_claims() {
    let root = temp_root();
    let broker = FsBroker::with_ack_wait(&root, Duration::from_millis(50));
    let stream = broker.stream("default");

    stream.append(headers("a", "a")).await.unwrap();
    let first = stream
        .next(Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.seq, 1);

    // Never acked; after the ack deadline the claim expires.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = stream.next(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(second.seq, 1);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_record_store_cas() {
    let root = temp_root();
    let broker = FsBroker::new(&root);
    let records = broker.records();

    let rev = records.create("jobs.x", b"one".to_vec()).await.unwrap();
    assert_eq!(rev, 1);

    let err = records.create("jobs.x", b"two".to_vec()).await.unwrap_err();
    assert!(matches!(err, BenchdError::Conflict(_)));

    let entry = records.get("jobs.x").await.unwrap();
    assert_eq!(entry.value, b"one");
    assert_eq!(entry.revision, 1);

    let rev = records.update("jobs.x", b"two".to_vec(), 1).await.unwrap();
    assert_eq!(rev, 2);

    let err = records.update("jobs.x", b"three".to_vec(), 1).await.unwrap_err();
    assert!(matches!(err, BenchdError::Conflict(_)));

    records.create("jobs.y", b"other".to_vec()).await.unwrap();
    let snapshot = records.snapshot().await.unwrap();
    let keys: Vec<&str> = snapshot.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["jobs.x", "jobs.y"]);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_blob_store_round_trip() {
    let root = temp_root();
    let broker = FsBroker::new(&root);
    let blobs = broker.blobs();

    blobs.put("artifacts.x.results", b"data").await.unwrap();
    assert_eq!(blobs.get("artifacts.x.results").await.unwrap(), b"data");

    let err = blobs.get("artifacts.x.log").await.unwrap_err();
    assert!(matches!(err, BenchdError::NotFound(_)));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn test_queue_flow_over_fs_broker() {
    let root = temp_root();
    let broker = FsBroker::new(&root);
    let client = Client::new(broker.as_ref(), "prod", "default");

    let job = client
        .submit_job(JobParameters {
            git_remote: "u/a".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    // A second client over the same root sees the same state, the way the
    // CLI and the web surface share a deployment.
    let other = Client::new(broker.as_ref(), "prod", "default");
    let (loaded, revision) = other.load_job(job.id).await.unwrap();
    assert_eq!(loaded.id, job.id);
    assert_eq!(revision, 1);

    let listed = other.load_jobs(10, 0, true).await.unwrap();
    assert_eq!(listed.len(), 1);

    other.cancel_job(job.id).await.unwrap();
    let (record, _) = client.load_job(job.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);

    let (_, counts) = client.load_jobs_by_kv(0, 0, &[]).await.unwrap();
    assert_eq!(counts.get(&JobStatus::Cancelled), Some(&1));

    let _ = std::fs::remove_dir_all(&root);
}
