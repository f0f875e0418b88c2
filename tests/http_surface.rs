mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use common::{MockApi, Reply, TOKEN, endpoint, fast_policy, spawn, submission};
use kobo_pipeline::export::{CSV_MIME, XLSX_MIME};
use kobo_pipeline::routes::create_router;
use kobo_pipeline::{AppState, FetchClient, Settings, SurveyPipeline};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde_json::{Value, json};

fn survey() -> Vec<Vec<Value>> {
    vec![vec![
        submission(1, "2024-03-01T08:00:00", "Kinshasa", "Mbala", "-4.32 15.31 430 0", json!([22000])),
        submission(2, "2024-03-02T09:00:00", "Kwilu", "Ilunga", "-4.30 15.29", json!([1500])),
        submission(3, "2024-03-05T10:00:00", "Kongo-Central", "Kabila", "", json!([300])),
    ]]
}

// Serves the app router in front of the mock survey API
async fn serve_app(api: &MockApi) -> SocketAddr {
    let api_addr = spawn(api.clone()).await;
    let settings = Arc::new(Settings::for_endpoint(endpoint(api_addr), Some(TOKEN.to_string())));
    let client = FetchClient::new(fast_policy()).unwrap();
    let pipeline = Arc::new(SurveyPipeline::with_client(Arc::clone(&settings), client));
    let app = create_router(AppState { settings, pipeline });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn post(addr: SocketAddr, path: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}{}", addr, path))
        .header(CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(&body).unwrap())
        .send()
        .await
        .unwrap()
}

async fn json_body(response: reqwest::Response) -> Value {
    serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
}

#[tokio::test]
async fn xlsx_export_is_an_attachment() {
    let api = MockApi::with_pages(survey());
    let addr = serve_app(&api).await;

    let response = post(addr, "/api/export", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], XLSX_MIME);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"filtered_data.xlsx\""
    );
    let bytes = response.bytes().await.unwrap();
    // xlsx is a zip container
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn csv_export_uses_the_requested_name_and_columns() {
    let api = MockApi::with_pages(survey());
    let addr = serve_app(&api).await;

    let body = json!({
        "format": "csv",
        "file_name": "rapport mars",
        "columns": ["_id", "Name_Agent"],
        "filter": {"selections": {"Identification/Province": ["Kwilu"]}}
    });
    let response = post(addr, "/api/export", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], CSV_MIME);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename=\"rapport mars.csv\""
    );
    let text = response.text().await.unwrap();
    assert_eq!(text.lines().collect::<Vec<_>>(), vec!["_id,Name_Agent", "2,Ilunga"]);
}

#[tokio::test]
async fn unknown_export_column_is_unprocessable() {
    let api = MockApi::with_pages(survey());
    let addr = serve_app(&api).await;

    let response = post(addr, "/api/export", json!({"columns": ["_id", "Commune"]})).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.text().await.unwrap().contains("Commune"));
}

#[tokio::test]
async fn inverted_date_range_is_a_bad_request() {
    let api = MockApi::with_pages(survey());
    let addr = serve_app(&api).await;

    let body = json!({"filter": {"date_range": {"start": "2024-03-05", "end": "2024-03-01"}}});
    let response = post(addr, "/api/view", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = reqwest::get(format!(
        "http://{}/api/options/Name_Agent?start=2024-03-05&end=2024-03-01",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn view_returns_rows_metrics_and_derived_columns() {
    let api = MockApi::with_pages(survey());
    let addr = serve_app(&api).await;

    let body = json!({"filter": {"date_range": {"start": "2024-03-01", "end": "2024-03-02"}}});
    let view = json_body(post(addr, "/api/view", body).await).await;

    assert_eq!(view["rows"].as_array().unwrap().len(), 2);
    assert_eq!(view["metrics"]["count"], 2);
    assert_eq!(view["metrics"]["total_value"], 23500.0);
    assert_eq!(view["derived_columns"], json!(["Sondage_Transformed"]));
    assert_eq!(view["warning"], Value::Null);
}

#[tokio::test]
async fn options_follow_the_selected_dates() {
    let api = MockApi::with_pages(survey());
    let addr = serve_app(&api).await;

    let all = reqwest::get(format!("http://{}/api/options/Name_Agent", addr)).await.unwrap();
    assert_eq!(json_body(all).await["values"], json!(["Ilunga", "Kabila", "Mbala"]));

    let dated = reqwest::get(format!(
        "http://{}/api/options/Name_Agent?start=2024-03-01&end=2024-03-02",
        addr
    ))
    .await
    .unwrap();
    assert_eq!(json_body(dated).await["values"], json!(["Ilunga", "Mbala"]));
}

#[tokio::test]
async fn failed_load_degrades_reads_to_an_empty_table() {
    let api = MockApi::with_pages(survey());
    api.push_script([Reply::Status(401)]);
    let addr = serve_app(&api).await;

    let response = post(addr, "/api/view", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["rows"], json!([]));
    assert_eq!(view["metrics"]["count"], 0);
    assert!(view["warning"].as_str().unwrap().contains("401"));
}

#[tokio::test]
async fn refresh_surfaces_upstream_failure_as_bad_gateway() {
    let api = MockApi::with_pages(survey());
    api.push_script([Reply::Status(403)]);
    let addr = serve_app(&api).await;

    let response = post(addr, "/api/refresh", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = post(addr, "/api/refresh", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["rows"], 3);
}
