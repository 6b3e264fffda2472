//! HTTP-level tests for the registry source and the xAI analyzer.
//!
//! Each test serves a small axum app on an ephemeral port and points the
//! client at it.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notice_pipeline::analysis::{AnalysisRequest, Analyzer, XaiAnalyzer};
use notice_pipeline::config::{AnalysisConfig, RegistryConfig};
use notice_pipeline::context::JobContext;
use notice_pipeline::error::PipelineError;
use notice_pipeline::models::ImpactScore;
use notice_pipeline::source_fedreg::FederalRegisterSource;
use notice_pipeline::traits::DocumentSource;

// ─── Mock Registry ──────────────────────────────────────────────────

#[derive(Clone)]
struct RegistryState {
    total: usize,
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn documents(
    State(state): State<RegistryState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: usize = params
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(20);
    state.requests.lock().unwrap().push(params);

    let start = (page - 1) * per_page;
    let end = (start + per_page).min(state.total);
    let results: Vec<Value> = (start..end)
        .map(|i| {
            json!({
                "document_number": format!("2025-{:05}", i),
                "title": format!("Notice {}", i),
                "type": "Notice",
                "abstract": null,
                "excerpts": "text",
                "html_url": format!("https://www.federalregister.gov/d/2025-{:05}", i),
                "publication_date": "2025-01-10",
                "agencies": [{"name": "Commerce Department"}]
            })
        })
        .collect();

    Json(json!({ "count": state.total, "results": results }))
}

async fn agencies() -> Json<Value> {
    Json(json!([
        {"id": 54, "name": "Commerce Department", "short_name": "DOC", "slug": "commerce-department", "parent_id": null},
        {"name": "No Id Office", "slug": "no-id-office"},
        {"id": 12, "name": "Census Bureau", "slug": "census-bureau", "parent_id": 54}
    ]))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn registry(total: usize) -> (String, Arc<Mutex<Vec<HashMap<String, String>>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = RegistryState {
        total,
        requests: requests.clone(),
    };
    let app = Router::new()
        .route("/api/v1/documents", get(documents))
        .route("/api/v1/agencies", get(agencies))
        .with_state(state);
    let base = serve(app).await;
    (format!("{}/api/v1", base), requests)
}

fn source(base_url: String, per_page: u32, max_pages: u32) -> FederalRegisterSource {
    FederalRegisterSource::new(&RegistryConfig {
        base_url,
        per_page,
        max_pages,
        timeout_secs: 5,
        page_delay_ms: 0,
        days_lookback: 7,
    })
    .unwrap()
}

// ─── Registry Source ────────────────────────────────────────────────

#[tokio::test]
async fn test_paging_stops_at_short_page() {
    let (base, requests) = registry(5).await;
    let fetched = source(base, 2, 10).fetch(7, &JobContext::new()).await.unwrap();

    assert_eq!(fetched.len(), 5);
    let pages: Vec<String> = requests
        .lock()
        .unwrap()
        .iter()
        .map(|q| q["page"].clone())
        .collect();
    assert_eq!(pages, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_paging_capped_by_max_pages() {
    let (base, requests) = registry(100).await;
    let fetched = source(base, 2, 2).fetch(7, &JobContext::new()).await.unwrap();

    assert_eq!(fetched.len(), 4);
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_fetch_sends_date_window() {
    let (base, requests) = registry(1).await;
    source(base, 10, 1).fetch(7, &JobContext::new()).await.unwrap();

    let requests = requests.lock().unwrap();
    let query = &requests[0];
    let gte = &query["filter[publication_date][gte]"];
    let lte = &query["filter[publication_date][lte]"];
    assert_eq!(gte.len(), 10);
    assert!(gte < lte, "window start {} should precede end {}", gte, lte);
    assert_eq!(query["per_page"], "10");
}

#[tokio::test]
async fn test_fetched_payload_parses_back() {
    let (base, _) = registry(1).await;
    let src = source(base, 10, 1);
    let fetched = src.fetch(1, &JobContext::new()).await.unwrap();

    let item = &fetched[0];
    assert_eq!(item.document.external_id, "2025-00000");
    assert_eq!(src.parse_payload(&item.raw_payload).unwrap(), item.document);

    let raw: Value = serde_json::from_slice(&item.raw_payload).unwrap();
    assert_eq!(raw["type"], "Notice");
}

/// One result object exactly as upstream formats it: unsorted keys, a
/// trailing-zero decimal and inner whitespace.
const UPSTREAM_RESULT: &str = r#"{"title":"Zeta Notice","document_number":"2025-00001", "score": 1.50,"publication_date":"2025-01-10","html_url":"https://www.federalregister.gov/d/2025-00001","agencies":[{"name":"Commerce Department","id":54}]}"#;

#[tokio::test]
async fn test_raw_payload_is_upstream_bytes() {
    let app = Router::new().route(
        "/api/v1/documents",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "application/json")],
                format!(r#"{{"count":1,"results":[ {} ]}}"#, UPSTREAM_RESULT),
            )
        }),
    );
    let base = serve(app).await;

    let fetched = source(format!("{}/api/v1", base), 10, 1)
        .fetch(1, &JobContext::new())
        .await
        .unwrap();

    assert_eq!(fetched.len(), 1);
    assert_eq!(
        std::str::from_utf8(&fetched[0].raw_payload).unwrap(),
        UPSTREAM_RESULT
    );
    assert_eq!(fetched[0].document.title, "Zeta Notice");
    assert_eq!(fetched[0].document.external_id, "2025-00001");
}

#[tokio::test]
async fn test_non_success_status_is_upstream_error() {
    let app = Router::new().route(
        "/api/v1/documents",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance window") }),
    );
    let base = serve(app).await;

    let err = source(format!("{}/api/v1", base), 10, 2)
        .fetch(1, &JobContext::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::UpstreamStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance window");
        }
        other => panic!("expected UpstreamStatus, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_page_is_transport_error() {
    let app = Router::new().route("/api/v1/documents", get(|| async { "not json" }));
    let base = serve(app).await;

    let err = source(format!("{}/api/v1", base), 10, 1)
        .fetch(1, &JobContext::new())
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_cancelled_fetch_makes_no_requests() {
    let (base, requests) = registry(10).await;
    let ctx = JobContext::new();
    ctx.cancel();

    let err = source(base, 2, 5).fetch(1, &ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_agencies_without_id_skipped() {
    let (base, _) = registry(0).await;
    let listed = source(base, 10, 1)
        .fetch_agencies(&JobContext::new())
        .await
        .unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, 54);
    assert_eq!(listed[0].short_name.as_deref(), Some("DOC"));
    assert_eq!(listed[1].parent_id, Some(54));
}

// ─── xAI Analyzer ───────────────────────────────────────────────────

fn analysis_config(base_url: String) -> AnalysisConfig {
    AnalysisConfig {
        provider: "xai".into(),
        base_url,
        model: "test-model".into(),
        timeout_secs: 5,
        max_retries: 2,
    }
}

fn request() -> AnalysisRequest {
    AnalysisRequest {
        title: "Tariff Adjustment".into(),
        agency: "Commerce Department".into(),
        text: "Adjusts tariffs on imported steel.".into(),
    }
}

#[tokio::test]
async fn test_xai_parses_fenced_reply() {
    let app = Router::new().route(
        "/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["model"], "test-model");
            let content = "```json\n{\"summary\": \"Steel gets pricier.\", \"keypoints\": [\"Tariffs rise\"], \"impact_score\": \"HIGH\", \"political_score\": 35}\n```";
            Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
        }),
    );
    let base = serve(app).await;

    let analyzer = XaiAnalyzer::new(&analysis_config(base), "test-key".into()).unwrap();
    let analysis = analyzer.analyze(&request(), &JobContext::new()).await.unwrap();

    assert_eq!(analysis.summary, "Steel gets pricier.");
    assert_eq!(analysis.key_points, vec!["Tariffs rise"]);
    assert_eq!(analysis.impact_score, ImpactScore::High);
    assert_eq!(analysis.political_score, 35);
}

#[tokio::test]
async fn test_xai_client_error_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::BAD_REQUEST, "bad model")
            }
        }),
    );
    let base = serve(app).await;

    let analyzer = XaiAnalyzer::new(&analysis_config(base), "test-key".into()).unwrap();
    let err = analyzer.analyze(&request(), &JobContext::new()).await.unwrap_err();

    assert!(matches!(err, PipelineError::UpstreamStatus { status: 400, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_xai_backoff_stops_on_cancel() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
            }
        }),
    );
    let base = serve(app).await;

    let analyzer = XaiAnalyzer::new(&analysis_config(base), "test-key".into()).unwrap();
    let ctx = JobContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = analyzer.analyze(&request(), &ctx).await.unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    // The first backoff is one second; cancellation cuts it short.
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
