//! Read-only web surface.
//!
//! GET-only: an index with the queue status histogram, a paginated queue
//! listing with global search, and per-job resources (record, artifacts,
//! a single-job plot, cancel). Error kinds map onto HTTP statuses:
//! `NotFound` -> 404, `IllegalState` -> 409, everything else -> 500.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{BenchdError, ErrorKind};
use crate::job::{JobRecord, JobStatus};
use crate::queue::Client;
use crate::reports::{create_data_table, write_report, Metric, ReportConfig, Section};

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone)]
pub struct WebState {
    pub client: Arc<Client>,
}

pub fn router(state: WebState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/queue", get(queue_handler))
        .route("/job/:id/:resource", get(job_resource_handler))
        .fallback(|| async { (StatusCode::BAD_REQUEST, "Bad request") })
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: WebState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "starting web server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind web server");
            return;
        }
    };

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "web server failed");
    }
}

struct WebError(BenchdError);

impl From<BenchdError> for WebError {
    fn from(e: BenchdError) -> Self {
        WebError(e)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::IllegalState => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(status = %status, error = %self.0, "request failed");
        (status, self.0.to_string()).into_response()
    }
}

fn html_escape(s: &str) -> String {
    crate::reports::section::html_escape(s)
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>{title}</title>\
         <style>body{{font-family:sans-serif;margin:2em auto;max-width:1100px}}\
         table{{border-collapse:collapse;width:100%}}\
         th,td{{border:1px solid #ccc;padding:4px 8px;font-size:0.9em}}\
         th{{background:#f0f2f5;text-align:left}}\
         tr.highlight{{background:#fff8c5}}\
         .pager a,.pager span{{margin-right:0.5em}}\
         .status-succeeded{{color:#1a7f37}}.status-failed{{color:#cf222e}}\
         .status-cancelled{{color:#9a6700}}</style>\
         </head><body>{body}</body></html>",
        title = html_escape(title),
        body = body,
    ))
}

async fn index_handler(State(state): State<WebState>) -> Result<Html<String>, WebError> {
    let status = state.client.queue_status().await?;
    let counts = state.client.count_jobs_by_status().await?;

    let mut body = format!(
        "<h1>benchd: {}</h1><p>{} submitted jobs in the queue.</p><ul>",
        html_escape(state.client.queue_name()),
        status.submitted_count
    );
    for (job_status, count) in &counts {
        body.push_str(&format!("<li>{job_status}: {count}</li>"));
    }
    body.push_str("</ul><p><a href=\"/queue\">Browse the queue</a></p>");
    Ok(page("benchd", &body))
}

#[derive(Deserialize)]
struct QueueQuery {
    offset: Option<usize>,
    limit: Option<usize>,
    search: Option<String>,
    highlight: Option<String>,
}

/// Tokens rendered in the pager: first and last pages always, a window of
/// pages around the current one, ellipses for what is collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageToken {
    Page(usize),
    Ellipsis,
}

pub fn calculate_pagination(current: usize, total: usize, window: usize) -> Vec<PageToken> {
    let mut tokens = vec![PageToken::Page(1)];

    let mut start = current.saturating_sub(window);
    if start > 2 {
        tokens.push(PageToken::Ellipsis);
    } else {
        start = 2;
    }

    let mut end = current + window;
    if end >= total.saturating_sub(1) {
        end = total.saturating_sub(1);
    }

    for i in start..=end {
        if i > 1 && i < total {
            tokens.push(PageToken::Page(i));
        }
    }

    if end < total.saturating_sub(1) {
        tokens.push(PageToken::Ellipsis);
    }

    if total > 1 {
        tokens.push(PageToken::Page(total));
    }

    tokens
}

fn matches_highlight(job: &JobRecord, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let needle = needle.to_lowercase();
    [
        job.id.to_string(),
        job.parameters.git_ref.clone(),
        job.parameters.git_remote.clone(),
        job.parameters.tests_filter_expr.clone(),
    ]
    .iter()
    .any(|f| f.to_lowercase().contains(&needle))
}

async fn queue_handler(
    State(state): State<WebState>,
    Query(query): Query<QueueQuery>,
) -> Result<Response, WebError> {
    let offset = query.offset.unwrap_or(0);
    let mut limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 {
        limit = DEFAULT_PAGE_SIZE;
    }

    // Global search: redirect to the page containing the newest hit,
    // carrying the query over as a row highlight.
    let search = query.search.as_deref().unwrap_or("").trim();
    if !search.is_empty() {
        if let Some(found) = state.client.find_job_offset(search).await? {
            let new_offset = (found / limit) * limit;
            let url = format!(
                "/queue?offset={new_offset}&limit={limit}&highlight={}",
                urlencode(search)
            );
            return Ok(Redirect::to(&url).into_response());
        }
        // No hit: fall through to the first page.
    }

    let jobs = state.client.load_jobs(limit, offset, true).await?;
    let status = state.client.queue_status().await?;

    let total = status.submitted_count as usize;
    let total_pages = total.div_ceil(limit);
    let current_page = offset / limit + 1;
    let tokens = calculate_pagination(current_page, total_pages, 2);

    let highlight = query.highlight.as_deref().unwrap_or("");
    let mut body = format!(
        "<h1>Queue: {}</h1>\
         <form action=\"/queue\" method=\"get\">\
         <input type=\"text\" name=\"search\" placeholder=\"id, ref, remote, filter\">\
         <button type=\"submit\">Search</button></form>",
        html_escape(state.client.queue_name())
    );
    body.push_str(
        "<table><thead><tr><th>Job</th><th>Remote</th><th>Ref</th><th>Label</th>\
         <th>Status</th><th>Created</th><th></th></tr></thead><tbody>",
    );
    for job in &jobs {
        let row_class = if matches_highlight(job, highlight) {
            " class=\"highlight\""
        } else {
            ""
        };
        let mut links = format!(
            "<a href=\"/job/{id}/results\">results</a> <a href=\"/job/{id}/log\">log</a> \
             <a href=\"/job/{id}/plot\">plot</a>",
            id = job.id
        );
        if job.status == JobStatus::Submitted {
            links.push_str(&format!(" <a href=\"/job/{}/cancel\">cancel</a>", job.id));
        }
        body.push_str(&format!(
            "<tr{row_class}><td><a href=\"/job/{id}/record\"><code>{id}</code></a></td>\
             <td>{remote}</td><td>{git_ref}</td><td>{label}</td>\
             <td class=\"status-{status}\">{status}</td><td>{created}</td><td>{links}</td></tr>",
            id = job.id,
            remote = html_escape(&job.parameters.git_remote),
            git_ref = html_escape(&job.parameters.git_ref),
            label = html_escape(&job.parameters.label),
            status = job.status,
            created = job.created.format("%Y-%m-%d %H:%M:%S"),
            links = links,
        ))
    }
    body.push_str("</tbody></table>");

    body.push_str("<div class=\"pager\">");
    for token in tokens {
        match token {
            PageToken::Page(p) if p == current_page => {
                body.push_str(&format!("<span><b>{p}</b></span>"));
            }
            PageToken::Page(p) => {
                let page_offset = (p - 1) * limit;
                body.push_str(&format!(
                    "<a href=\"/queue?offset={page_offset}&limit={limit}\">{p}</a>"
                ));
            }
            PageToken::Ellipsis => body.push_str("<span>&hellip;</span>"),
        }
    }
    body.push_str("</div>");

    Ok(page("benchd queue", &body).into_response())
}

async fn job_resource_handler(
    State(state): State<WebState>,
    Path((id, resource)): Path<(String, String)>,
) -> Result<Response, WebError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| WebError(BenchdError::NotFound(format!("job {id}"))))?;

    match resource.as_str() {
        "record" => {
            let (job, _) = state.client.load_job(id).await?;
            let json = serde_json::to_string_pretty(&job).map_err(BenchdError::from)?;
            Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
        }
        "results" | "log" | "script" => {
            let (job, _) = state.client.load_job(id).await?;
            let mut buf = Vec::new();
            match resource.as_str() {
                "results" => state.client.load_results_artifact(&job, &mut buf).await?,
                "log" => state.client.load_log_artifact(&job, &mut buf).await?,
                _ => state.client.load_script_artifact(&job, &mut buf).await?,
            }
            Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], buf).into_response())
        }
        "plot" => {
            let table = create_data_table(&state.client, &[id]).await?;
            let mut cfg = ReportConfig::new(format!("Results report for job {id}"));
            cfg.add_sections([Section::jobs_table()]);
            if table.has_speed() {
                cfg.add_sections([
                    Section::horizontal_box_chart("", Metric::Speed, ""),
                    Section::results_table(Metric::Speed, "", true),
                ]);
            }
            cfg.add_sections([
                Section::horizontal_box_chart("", Metric::TimeOp, ""),
                Section::results_table(Metric::TimeOp, "", true),
            ]);
            let mut html = Vec::new();
            write_report(&cfg, &table, &mut html)?;
            Ok(Html(html).into_response())
        }
        "cancel" => {
            state.client.cancel_job(id).await?;
            Ok(format!("Job {id} cancelled").into_response())
        }
        _ => Ok((StatusCode::BAD_REQUEST, "Bad request").into_response()),
    }
}
