mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::{MockApi, Reply, TOKEN, endpoint, fast_policy, spawn, submission};
use kobo_pipeline::aggregate::{map_center, map_points, summarize, value_counts};
use kobo_pipeline::filter::filter;
use kobo_pipeline::{
    CellValue, DateRange, FetchClient, FilterSpec, PipelineError, Settings, SurveyPipeline,
    ValidationError,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn survey() -> Vec<Vec<serde_json::Value>> {
    vec![
        vec![
            submission(1, "2024-03-01T08:00:00", "Kinshasa", "Mbala", "-4.32 15.31 430 0", json!([22000])),
            submission(2, "2024-03-01T17:45:00", "Kinshasa", "Ilunga", "-4.30 15.29 420 0", json!([1500])),
            submission(3, "not a date", "Kinshasa", "Ilunga", "", json!([9999])),
        ],
        vec![
            submission(4, "2024-03-02T10:00:00", "Kwilu", "Mbala", "garbage", json!(["n/a"])),
            submission(5, "2024-03-04T10:00:00", "Kinshasa", "Kabila", "-4.40 15.40", json!([3000])),
        ],
    ]
}

fn pipeline_for(endpoint: String, token: Option<&str>) -> SurveyPipeline {
    let settings = Arc::new(Settings::for_endpoint(endpoint, token.map(String::from)));
    let client = FetchClient::new(fast_policy()).unwrap();
    SurveyPipeline::with_client(settings, client)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

#[tokio::test]
async fn full_cycle_from_api_to_metrics() {
    let api = MockApi::with_pages(survey());
    let addr = spawn(api.clone()).await;
    let pipeline = pipeline_for(endpoint(addr), Some(TOKEN));

    let loaded = pipeline.load(false).await.unwrap();
    assert_eq!(loaded.table.submission_ids(), vec!["1", "2", "4", "5"]);
    assert_eq!(loaded.report.dropped_records, 1);
    assert_eq!(loaded.report.coercions_in("Latitude"), 1);
    assert!(loaded.table.has_column("Sondage_Transformed"));
    assert!(loaded.table.has_column("meta.instanceID"));

    let spec = FilterSpec::new()
        .with_dates(DateRange::new(day(1), day(2)).unwrap())
        .select("Identification/Province", ["Kinshasa"])
        .select("Name_Agent", Vec::<String>::new());
    let view = filter(&loaded.table, &spec).unwrap();
    assert_eq!(view.submission_ids(), vec!["1", "2"]);

    let metrics = summarize(&view, "Sondage_Transformed");
    assert_eq!(metrics.count, 2);
    assert_eq!(metrics.total_value, Some(23500.0));

    // "n/a" counts as nothing but does not fail the total
    let all = summarize(&loaded.table, "Sondage_Transformed");
    assert_eq!(all.total_value, Some(26500.0));
    assert_eq!(all.non_numeric, 1);

    let agents = value_counts(&loaded.table, "Name_Agent");
    assert_eq!(agents[0].value, "Mbala");
    assert_eq!(agents[0].count, 2);

    let points = map_points(&loaded.table, "Name_Agent");
    assert_eq!(points.len(), 3);
    assert!(map_center(&points).is_some());

    let row = &loaded.table.rows()[0];
    assert_eq!(row.get("Latitude"), Some(&CellValue::Number(-4.32)));
    assert_eq!(row.get("Sondage_Transformed"), Some(&CellValue::Text("22000".into())));
}

#[tokio::test]
async fn missing_token_fails_before_any_request() {
    let api = MockApi::with_pages(survey());
    let addr = spawn(api.clone()).await;
    let pipeline = pipeline_for(endpoint(addr), None);

    let err = pipeline.load(false).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ValidationError::MissingCredential)));
    assert_eq!(api.hits(), 0);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_table() {
    let api = MockApi::with_pages(survey());
    let addr = spawn(api.clone()).await;
    let pipeline = pipeline_for(endpoint(addr), Some(TOKEN));

    let first = pipeline.load(false).await.unwrap();
    assert_eq!(first.table.len(), 4);

    api.push_script([Reply::Status(403)]);
    let err = pipeline.load(true).await.unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(_)));

    let current = pipeline.current().unwrap();
    assert_eq!(current.table.submission_ids(), first.table.submission_ids());
}

#[tokio::test]
async fn snapshot_degrades_to_empty_table_with_message() {
    let api = MockApi::with_pages(survey());
    api.push_script([Reply::Status(401)]);
    let addr = spawn(api.clone()).await;
    let pipeline = pipeline_for(endpoint(addr), Some(TOKEN));

    let snapshot = pipeline.snapshot().await;
    assert!(snapshot.table.is_empty());
    assert!(snapshot.warning.unwrap().contains("401"));

    let metrics = summarize(&snapshot.table, "Sondage_Transformed");
    assert_eq!(metrics.count, 0);
    assert_eq!(metrics.total_value, None);
}

#[tokio::test]
async fn refresh_bypasses_cached_pages() {
    let api = MockApi::with_pages(survey());
    let addr = spawn(api.clone()).await;
    let pipeline = pipeline_for(endpoint(addr), Some(TOKEN));

    pipeline.load(false).await.unwrap();
    assert_eq!(api.hits(), 2);

    // fresh table within TTL: no network at all
    pipeline.ensure_loaded().await.unwrap();
    assert_eq!(api.hits(), 2);

    // cached pages are reused by a non-refresh load
    pipeline.load(false).await.unwrap();
    assert_eq!(api.hits(), 2);

    api.set_pages(vec![vec![submission(9, "2024-03-09T09:00:00", "Kwilu", "Mbala", "", json!([1]))]]);
    let reloaded = pipeline.load(true).await.unwrap();
    assert_eq!(api.hits(), 3);
    assert_eq!(reloaded.table.submission_ids(), vec!["9"]);
}
