use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::PipelineError;
use crate::github::{GitHubClient, IssueEnricher};
use crate::llm::CompletionClient;
use crate::pipeline::{self, Enricher, SectionEvent};
use crate::store::{NoteKind, StoreHandle};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: StoreHandle,
    pub github: Arc<GitHubClient>,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DiffsQuery {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Deserialize)]
pub struct IssuesQuery {
    pub pr: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
}

#[derive(Deserialize)]
pub struct GenerateNotesRequest {
    pub pr_id: String,
    pub diff: String,
    pub owner: Option<String>,
    pub repo: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateNotesRequest {
    pub developer: Option<String>,
    pub marketing: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/diffs", get(list_diffs))
        .route("/api/issues", get(related_issues))
        .route("/api/notes/generate", post(generate_notes))
        .route("/api/notes/{pr_id}", get(get_notes).put(put_notes))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// One NDJSON line of the generate-notes response body.
fn section_line(event: &SectionEvent) -> String {
    let mut line = serde_json::json!({
        "section": event.kind.as_str(),
        "text": event.text,
    })
    .to_string();
    line.push('\n');
    line
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_diffs(
    State(state): State<SharedState>,
    Query(query): Query<DiffsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = query.owner.unwrap_or_else(|| state.config.github_owner.clone());
    let repo = query.repo.unwrap_or_else(|| state.config.github_repo.clone());
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(10).clamp(1, 50);

    let diffs = state
        .github
        .list_merged_diffs(&owner, &repo, page, per_page)
        .await
        .map_err(|e| ApiError::Internal(format!("Could not fetch PR diffs: {e:#}")))?;
    Ok(Json(diffs))
}

async fn related_issues(
    State(state): State<SharedState>,
    Query(query): Query<IssuesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pr = query
        .pr
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing pr param".into()))?;
    let owner = query.owner.unwrap_or_else(|| state.config.github_owner.clone());
    let repo = query.repo.unwrap_or_else(|| state.config.github_repo.clone());

    let summary = state
        .github
        .search_related_issues(&owner, &repo, &pr)
        .await
        .map_err(|e| ApiError::Internal(format!("Issue search failed: {e:#}")))?;
    Ok(Json(serde_json::json!({ "summary": summary })))
}

/// Run the full pipeline for one diff and stream section events back as
/// NDJSON. Each completed section is also written through to the note
/// store. If the client disconnects, the pipeline is cancelled at its next
/// suspend point.
async fn generate_notes(
    State(state): State<SharedState>,
    Json(req): Json<GenerateNotesRequest>,
) -> Result<Response, ApiError> {
    if req.pr_id.trim().is_empty() {
        return Err(ApiError::BadRequest("pr_id is required".into()));
    }
    let api_key = state
        .config
        .openai_api_key
        .clone()
        .ok_or_else(|| ApiError::BadRequest("OPENAI_API_KEY is not configured".into()))?;

    let owner = req.owner.unwrap_or_else(|| state.config.github_owner.clone());
    let repo = req.repo.unwrap_or_else(|| state.config.github_repo.clone());

    let completion = CompletionClient::new(api_key, state.config.openai_model.clone());
    let chunks = completion
        .stream_notes(&req.diff)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to start completion stream: {e:#}")))?;

    let enricher = IssueEnricher::new(Arc::clone(&state.github), owner, repo);
    let body = stream_note_events(state.store.clone(), chunks, enricher, req.pr_id);

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Bridge the extraction pipeline to an NDJSON response body.
///
/// Each completed section is written through to the store and forwarded as
/// one body line. A dropped body (client disconnect) flips the cancellation
/// signal immediately, even while no section is in flight. A mid-stream
/// transport failure terminates the body with one `{"error": …}` line so
/// the client can tell it apart from a stream that simply ended early.
fn stream_note_events<S, E>(store: StoreHandle, chunks: S, enricher: E, pr_id: String) -> Body
where
    S: Stream<Item = anyhow::Result<Bytes>> + Unpin + Send + 'static,
    E: Enricher + 'static,
{
    let (events_tx, mut events_rx) = mpsc::channel::<SectionEvent>(8);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (body_tx, body_rx) = mpsc::channel::<Result<String, std::convert::Infallible>>(8);

    let key = pr_id.clone();
    let pipeline_task = tokio::spawn(async move {
        pipeline::extract_notes(chunks, &enricher, &key, cancel_rx, events_tx).await
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = body_tx.closed() => {
                    let _ = cancel_tx.send(true);
                    break;
                }
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let kind = NoteKind::from(event.kind);
                    let body = event.text.clone();
                    let key = pr_id.clone();
                    if let Err(e) = store.call(move |s| s.put(&key, kind, &body)).await {
                        warn!(pr_id, "note write-through failed: {e:#}");
                    }
                    if body_tx.send(Ok(section_line(&event))).await.is_err() {
                        let _ = cancel_tx.send(true);
                        break;
                    }
                }
            }
        }
        match pipeline_task.await {
            Ok(Ok(notes)) => info!(
                pr_id,
                developer = notes.developer.is_some(),
                marketing = notes.marketing.is_some(),
                "note extraction finished"
            ),
            Ok(Err(e)) => {
                warn!(pr_id, "note extraction failed: {e}");
                let _ = body_tx.send(Ok(error_line(&e))).await;
            }
            Err(e) => warn!(pr_id, "note extraction task panicked: {e}"),
        }
    });

    Body::from_stream(ReceiverStream::new(body_rx))
}

/// Terminal NDJSON line for a failed extraction.
fn error_line(err: &PipelineError) -> String {
    let mut line = serde_json::json!({"error": err.to_string()}).to_string();
    line.push('\n');
    line
}

async fn get_notes(
    State(state): State<SharedState>,
    Path(pr_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .call(move |s| s.get(&pr_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(record))
}

async fn put_notes(
    State(state): State<SharedState>,
    Path(pr_id): Path<String>,
    Json(req): Json<UpdateNotesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.developer.is_none() && req.marketing.is_none() {
        return Err(ApiError::BadRequest(
            "Provide developer and/or marketing".into(),
        ));
    }
    let record = state
        .store
        .call(move |s| {
            if let Some(developer) = &req.developer {
                s.put(&pr_id, NoteKind::Developer, developer)?;
            }
            if let Some(marketing) = &req.marketing {
                s.put(&pr_id, NoteKind::Marketing, marketing)?;
            }
            s.get(&pr_id)
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(record))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::SectionKind;
    use crate::store::NoteStore;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct NoEnricher;

    #[async_trait::async_trait]
    impl Enricher for NoEnricher {
        async fn lookup(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    struct CountingEnricher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Enricher for CountingEnricher {
        async fn lookup(&self, _key: &str) -> anyhow::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn test_app() -> Router {
        let store = StoreHandle::new(NoteStore::new_in_memory().unwrap());
        let state = Arc::new(AppState {
            store,
            github: Arc::new(GitHubClient::new(None)),
            config: Config::default(),
        });
        api_router().with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_get_notes_for_unknown_pr_is_empty_record() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/notes/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let record: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(record["pr_id"], "999");
        assert!(record["developer"].is_null());
        assert!(record["marketing"].is_null());
    }

    #[tokio::test]
    async fn test_put_then_get_notes() {
        let app = test_app();

        let put = Request::builder()
            .method("PUT")
            .uri("/api/notes/42")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"developer": "Fixed it", "marketing": "Smoother!"}).to_string(),
            ))
            .unwrap();
        let resp = app.clone().oneshot(put).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let get = Request::builder()
            .uri("/api/notes/42")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(get).await.unwrap();
        let record: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(record["developer"], "Fixed it");
        assert_eq!(record["marketing"], "Smoother!");
        assert!(record["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_put_notes_partial_update_keeps_other_note() {
        let app = test_app();

        let put_both = Request::builder()
            .method("PUT")
            .uri("/api/notes/42")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"developer": "d1", "marketing": "m1"}).to_string(),
            ))
            .unwrap();
        app.clone().oneshot(put_both).await.unwrap();

        let put_dev = Request::builder()
            .method("PUT")
            .uri("/api/notes/42")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({"developer": "d2"}).to_string()))
            .unwrap();
        let resp = app.oneshot(put_dev).await.unwrap();
        let record: serde_json::Value = body_json(resp.into_body()).await;
        assert_eq!(record["developer"], "d2");
        assert_eq!(record["marketing"], "m1");
    }

    #[tokio::test]
    async fn test_put_notes_with_no_fields_is_rejected() {
        let app = test_app();
        let put = Request::builder()
            .method("PUT")
            .uri("/api/notes/42")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app.oneshot(put).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_without_api_key_is_rejected() {
        let app = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/api/notes/generate")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"pr_id": "1", "diff": "diff --git"}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let err: serde_json::Value = body_json(resp.into_body()).await;
        assert!(err["error"].as_str().unwrap().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_generate_with_blank_pr_id_is_rejected() {
        let app = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/api/notes/generate")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"pr_id": "  ", "diff": "x"}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_related_issues_requires_pr_param() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/issues")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_section_line_format() {
        let line = section_line(&SectionEvent {
            kind: SectionKind::Developer,
            text: "Fix null pointer bug".to_string(),
        });
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["section"], "developer");
        assert_eq!(value["text"], "Fix null pointer bug");
    }

    #[test]
    fn test_api_error_shapes() {
        let resp = ApiError::BadRequest("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = ApiError::Internal("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_transport_failure_ends_body_with_error_line() {
        let store = StoreHandle::new(NoteStore::new_in_memory().unwrap());
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"<developer>Fixed it</developer>")),
            Err(anyhow::anyhow!("connection reset")),
        ]);

        let body = stream_note_events(store, chunks, NoEnricher, "9".to_string());
        let bytes = body.collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["section"], "developer");
        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(last["error"].as_str().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_early_stream_end_has_no_error_line() {
        let store = StoreHandle::new(NoteStore::new_in_memory().unwrap());
        let chunks = futures_util::stream::iter(vec![Ok(Bytes::from_static(
            b"<developer>Fixed it</developer><marketing>never closed",
        ))]);

        let body = stream_note_events(store, chunks, NoEnricher, "9".to_string());
        let bytes = body.collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);

        let only: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(only["section"], "developer");
        assert!(only.get("error").is_none());
    }

    #[tokio::test]
    async fn test_dropped_body_cancels_pipeline_before_any_section() {
        let store = StoreHandle::new(NoteStore::new_in_memory().unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let enricher = CountingEnricher {
            calls: calls.clone(),
        };
        // No chunks ever arrive; the pipeline sits at the chunk-read
        // suspend point the whole time.
        let (chunk_tx, chunk_rx) = mpsc::channel::<anyhow::Result<Bytes>>(1);

        let body = stream_note_events(
            store,
            ReceiverStream::new(chunk_rx),
            enricher,
            "9".to_string(),
        );
        drop(body);

        // Cancellation tears the pipeline down, which drops the chunk
        // receiver. If the disconnect went unnoticed this times out.
        tokio::time::timeout(Duration::from_secs(5), chunk_tx.closed())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
