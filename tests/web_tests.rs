use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use benchd::broker::memory::MemoryBroker;
use benchd::job::{JobParameters, JobStatus};
use benchd::queue::Client;
use benchd::web::{calculate_pagination, router, PageToken, WebState};

fn create_test_app() -> (axum::Router, Client) {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.as_ref(), "test", "default");
    let state = WebState {
        client: Arc::new(client.clone()),
    };
    (router(state), client)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body.to_vec())
}

fn params(remote: &str) -> JobParameters {
    JobParameters {
        git_remote: remote.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_index_shows_queue_status() {
    let (app, client) = create_test_app();
    client.submit_job(params("u/a")).await.unwrap();

    let (status, _, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("1 submitted jobs"));
    assert!(html.contains("submitted: 1"));
}

#[tokio::test]
async fn test_queue_lists_jobs() {
    let (app, client) = create_test_app();
    let job = client.submit_job(params("u/a")).await.unwrap();

    let (status, _, body) = get(&app, "/queue").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains(&job.id.to_string()));
    assert!(html.contains("u/a"));
    // Submitted jobs offer a cancel link.
    assert!(html.contains(&format!("/job/{}/cancel", job.id)));
}

#[tokio::test]
async fn test_job_record_resource() {
    let (app, client) = create_test_app();
    let job = client.submit_job(params("u/a")).await.unwrap();

    let (status, headers, body) = get(&app, &format!("/job/{}/record", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("application/json"));

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], job.id.to_string());
    assert_eq!(json["status"], "submitted");
}

#[tokio::test]
async fn test_missing_job_maps_to_404() {
    let (app, _) = create_test_app();

    let (status, _, _) = get(&app, &format!("/job/{}/record", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A malformed id is indistinguishable from an absent job.
    let (status, _, _) = get(&app, "/job/not-a-uuid/record").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_resource_is_bad_request() {
    let (app, client) = create_test_app();
    let job = client.submit_job(params("u/a")).await.unwrap();

    let (status, _, _) = get(&app, &format!("/job/{}/shell", job.id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_resource_and_conflict_mapping() {
    let (app, client) = create_test_app();
    let job = client.submit_job(params("u/a")).await.unwrap();

    let (status, _, body) = get(&app, &format!("/job/{}/cancel", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("cancelled"));

    let (record, _) = client.load_job(job.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);

    // Cancelling a terminal job is an illegal state, mapped to 409.
    let (status, _, _) = get(&app, &format!("/job/{}/cancel", job.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_artifact_resources() {
    let (app, client) = create_test_app();
    let job = client.submit_job(params("u/a")).await.unwrap();
    client
        .upload_results_artifact(&job, b"BenchmarkX 1000 500 ns/op\n")
        .await
        .unwrap();
    client.upload_log_artifact(&job, b"build log\n").await.unwrap();

    let (status, _, body) = get(&app, &format!("/job/{}/results", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"BenchmarkX 1000 500 ns/op\n");

    let (status, _, body) = get(&app, &format!("/job/{}/log", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"build log\n");

    // No script artifact was uploaded.
    let (status, _, _) = get(&app, &format!("/job/{}/script", job.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plot_renders_single_job_report() {
    let (app, client) = create_test_app();
    let job = client.submit_job(params("u/a")).await.unwrap();
    client
        .upload_results_artifact(
            &job,
            b"BenchmarkKVPut-8 1000 512.5 ns/op 12.5 MB/s\nBenchmarkKVGet-8 2000 250 ns/op 25 MB/s\n",
        )
        .await
        .unwrap();

    let (status, _, body) = get(&app, &format!("/job/{}/plot", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("<svg"));
    assert!(html.contains("BenchmarkKVPut-8"));
}

#[tokio::test]
async fn test_search_redirects_to_matching_page() {
    let (app, client) = create_test_app();
    for remote in ["u/x", "u/y", "u/z"] {
        client.submit_job(params(remote)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let (status, headers, _) = get(&app, "/queue?search=u%2Fy").await;
    assert!(status.is_redirection());
    let location = headers.get("location").unwrap().to_str().unwrap();
    assert_eq!(location, "/queue?offset=0&limit=10&highlight=u%2Fy");
}

#[tokio::test]
async fn test_search_miss_falls_through_to_listing() {
    let (app, client) = create_test_app();
    client.submit_job(params("u/a")).await.unwrap();

    let (status, _, body) = get(&app, "/queue?search=nothing-matches").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("u/a"));
}

#[tokio::test]
async fn test_queue_pagination_window() {
    let (app, client) = create_test_app();
    for i in 0..25 {
        client.submit_job(params(&format!("u/repo{i}"))).await.unwrap();
    }

    let (status, _, body) = get(&app, "/queue?offset=10&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("u/repo10"));
    assert!(!html.contains("u/repo9</td>"));
    // Pager links to the neighboring pages.
    assert!(html.contains("/queue?offset=0&limit=10"));
    assert!(html.contains("/queue?offset=20&limit=10"));
}

#[test]
fn test_calculate_pagination_single_page() {
    assert_eq!(calculate_pagination(1, 1, 2), vec![PageToken::Page(1)]);
}

#[test]
fn test_calculate_pagination_no_ellipsis_when_window_covers_all() {
    assert_eq!(
        calculate_pagination(1, 3, 2),
        vec![PageToken::Page(1), PageToken::Page(2), PageToken::Page(3)]
    );
}

#[test]
fn test_calculate_pagination_collapses_both_sides() {
    assert_eq!(
        calculate_pagination(5, 10, 2),
        vec![
            PageToken::Page(1),
            PageToken::Ellipsis,
            PageToken::Page(3),
            PageToken::Page(4),
            PageToken::Page(5),
            PageToken::Page(6),
            PageToken::Page(7),
            PageToken::Ellipsis,
            PageToken::Page(10),
        ]
    );
}

#[test]
fn test_calculate_pagination_last_page() {
    assert_eq!(
        calculate_pagination(10, 10, 2),
        vec![
            PageToken::Page(1),
            PageToken::Ellipsis,
            PageToken::Page(8),
            PageToken::Page(9),
            PageToken::Page(10),
        ]
    );
}
