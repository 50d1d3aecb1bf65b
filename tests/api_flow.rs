//! End-to-end flow tests: pipeline output landing in the store and being
//! served back over the HTTP API, plus CLI smoke tests.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

use diff_digest::config::Config;
use diff_digest::github::GitHubClient;
use diff_digest::pipeline::{Enricher, SectionEvent, extract_notes};
use diff_digest::server::api::AppState;
use diff_digest::server::build_router;
use diff_digest::store::{NoteKind, NoteStore, StoreHandle};

struct FixedEnricher(String);

#[async_trait::async_trait]
impl Enricher for FixedEnricher {
    async fn lookup(&self, _key: &str) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

fn test_state() -> Arc<AppState> {
    Arc::new(AppState {
        store: StoreHandle::new(NoteStore::new_in_memory().unwrap()),
        github: Arc::new(GitHubClient::new(None)),
        config: Config::default(),
    })
}

async fn get_record(app: axum::Router, pr_id: &str) -> serde_json::Value {
    let req = Request::builder()
        .uri(format!("/api/notes/{}", pr_id))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn extracted_sections_are_readable_over_the_api() {
    let state = test_state();
    let store = state.store.clone();
    let app = build_router(state);

    let chunks = tokio_stream::iter(vec![
        Ok(Bytes::from_static(b"<developer>Fix null")),
        Ok(Bytes::from_static(b" pointer bug</developer><mark")),
        Ok(Bytes::from_static(b"eting>Improved stability.</marketing>")),
    ]);
    let enricher = FixedEnricher("Related issues:\n- #42".to_string());
    let (events_tx, mut events_rx) = mpsc::channel::<SectionEvent>(8);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let kind = NoteKind::from(event.kind);
                let body = event.text;
                store
                    .call(move |s| s.put("7", kind, &body))
                    .await
                    .unwrap();
            }
        })
    };

    let notes = extract_notes(chunks, &enricher, "7", cancel_rx, events_tx)
        .await
        .unwrap();
    writer.await.unwrap();

    assert_eq!(
        notes.developer.as_deref(),
        Some("Fix null pointer bug\n\nRelated issues:\n- #42")
    );
    assert_eq!(notes.marketing.as_deref(), Some("Improved stability."));

    let record = get_record(app, "7").await;
    assert_eq!(
        record["developer"],
        "Fix null pointer bug\n\nRelated issues:\n- #42"
    );
    assert_eq!(record["marketing"], "Improved stability.");
}

#[tokio::test]
async fn manual_edits_replace_generated_notes() {
    let state = test_state();
    let app = build_router(state);

    let put = Request::builder()
        .method("PUT")
        .uri("/api/notes/7")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"developer": "generated", "marketing": "generated"}).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(put).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let edit = Request::builder()
        .method("PUT")
        .uri("/api/notes/7")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"developer": "hand-tuned"}).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(edit).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let record = get_record(app, "7").await;
    assert_eq!(record["developer"], "hand-tuned");
    assert_eq!(record["marketing"], "generated");
}

#[tokio::test]
async fn generate_endpoint_validates_before_streaming() {
    let state = test_state();
    let app = build_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/notes/generate")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"pr_id": "7", "diff": "diff --git"}).to_string(),
        ))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    // No API key configured in the test state.
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

mod cli {
    use assert_cmd::Command;
    use predicates::prelude::*;

    fn digest() -> Command {
        Command::cargo_bin("diff-digest").unwrap()
    }

    #[test]
    fn test_help() {
        digest()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("release notes"));
    }

    #[test]
    fn test_version() {
        digest().arg("--version").assert().success();
    }
}
