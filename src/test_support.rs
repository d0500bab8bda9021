//! Shared helpers for router tests: a throw-away upstream that counts hits
//! and a one-shot request driver.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const REJECTED_APOD_DATE: &str = "1990-01-01";

pub struct Upstream {
    pub base: String,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

type Hits = State<Arc<AtomicUsize>>;

async fn apod(State(hits): Hits, Query(q): Query<HashMap<String, String>>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    if q.get("date").map(String::as_str) == Some(REJECTED_APOD_DATE) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 400, "msg": "Date must be between Jun 16, 1995 and today."})),
        )
            .into_response();
    }
    Json(json!({
        "date": q.get("date").cloned().unwrap_or_else(|| "2024-06-01".into()),
        "title": "Fake Nebula",
        "media_type": "image",
        "query": q,
    }))
    .into_response()
}

async fn mars(
    State(hits): Hits,
    Path(rover): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({"photos": [], "rover": rover, "query": q}))
}

async fn neo(State(hits): Hits, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({"element_count": 0, "query": q}))
}

async fn earth(State(hits): Hits) -> Redirect {
    hits.fetch_add(1, Ordering::SeqCst);
    Redirect::temporary("/earth-assets/LC08.png")
}

async fn earth_asset() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G'])
}

async fn epic(State(hits): Hits, Path(_date): Path<String>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!([
        {"image": "epic_1b_20240105003633", "caption": "first"},
        {"image": "epic_1b_20240105022436", "caption": "second"},
    ]))
}

pub async fn spawn_upstream() -> Upstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/planetary/apod", get(apod))
        .route("/mars-photos/api/v1/rovers/:rover/photos", get(mars))
        .route("/neo/rest/v1/feed", get(neo))
        .route("/planetary/earth/imagery", get(earth))
        .route("/earth-assets/LC08.png", get(earth_asset))
        .route("/EPIC/api/natural/date/:date", get(epic))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Upstream {
        base: format!("http://{addr}"),
        hits,
    }
}

/// Sends one request through `app` and decodes the JSON body (`Null` when
/// the body is not JSON).
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}
