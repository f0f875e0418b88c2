// In-process stand-in for the survey API, served by axum on an ephemeral port

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use kobo_pipeline::RetryPolicy;
use serde_json::{Value, json};

pub const TOKEN: &str = "test-token-123";
pub const DATA_PATH: &str = "/api/v2/assets/aXyZ/data/";

// Scripted answer for one request; when the script runs out, pages are served
#[derive(Clone)]
pub enum Reply {
    Status(u16),
    Slow(Duration),
}

#[derive(Clone, Default)]
pub struct MockApi {
    pub hits: Arc<AtomicUsize>,
    pub script: Arc<Mutex<VecDeque<Reply>>>,
    pub pages: Arc<Mutex<HashMap<u32, Vec<Value>>>>,
    pub page_count: Arc<AtomicUsize>,
}

impl MockApi {
    pub fn with_pages(pages: Vec<Vec<Value>>) -> Self {
        let api = MockApi::default();
        api.set_pages(pages);
        api
    }

    pub fn set_pages(&self, pages: Vec<Vec<Value>>) {
        let mut map = self.pages.lock().unwrap();
        map.clear();
        self.page_count.store(pages.len(), Ordering::SeqCst);
        for (i, results) in pages.into_iter().enumerate() {
            map.insert(i as u32 + 1, results);
        }
    }

    pub fn push_script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().extend(replies);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn data(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    api.hits.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Token {}", TOKEN);
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    if query.get("format").map(String::as_str) != Some("json") {
        return (StatusCode::BAD_REQUEST, "format=json required").into_response();
    }

    let scripted = api.script.lock().unwrap().pop_front();
    match scripted {
        Some(Reply::Status(code)) => {
            return StatusCode::from_u16(code).unwrap().into_response();
        }
        Some(Reply::Slow(delay)) => tokio::time::sleep(delay).await,
        None => {}
    }

    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let total = api.page_count.load(Ordering::SeqCst) as u32;
    let results = api.pages.lock().unwrap().get(&page).cloned().unwrap_or_default();
    let next = if page < total {
        Value::String(format!("http://mock{}?format=json&page={}", DATA_PATH, page + 1))
    } else {
        Value::Null
    };
    let count: usize = api.pages.lock().unwrap().values().map(Vec::len).sum();

    Json(json!({ "count": count, "next": next, "previous": null, "results": results })).into_response()
}

pub async fn spawn(api: MockApi) -> SocketAddr {
    let app = Router::new().route(DATA_PATH, get(data)).with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn endpoint(addr: SocketAddr) -> String {
    format!("http://{}{}", addr, DATA_PATH)
}

// Same shape as the default policy, scaled down so tests run fast
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        initial_backoff: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
    }
}

pub fn submission(id: u64, time: &str, province: &str, agent: &str, gps: &str, sondage: Value) -> Value {
    let outlet = if id % 2 == 0 { "Boutique" } else { "Kiosque" };
    json!({
        "_id": id,
        "_uuid": format!("uuid-{}", id),
        "_submission_time": time,
        "Identification/Province": province,
        "Identification/Commune": "Gombe",
        "Identification/Type_PDV": outlet,
        "Name_Agent": agent,
        "GPS": gps,
        "Sondage": sondage,
        "meta": { "instanceID": format!("uuid:{}", id) }
    })
}
