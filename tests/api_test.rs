use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tower::ServiceExt;

use wpt_charts::runner::link::SimpleSelectorResolver;
use wpt_charts::runner::prepare::{PageFetcher, PrepareError};
use wpt_charts::runner::TestRunner;
use wpt_charts::server::build_router;
use wpt_charts::state::AppState;
use wpt_charts::store::{
    Datapoint, DatapointWithNeighbors, ResultStore, SharedStore, SqliteStore, StoreResult,
};
use wpt_charts::suite_config::AppConfig;
use wpt_charts::wpt::{ServiceError, TestService, TestSubmission};

/// Wraps a real store and counts the reads the chart endpoints make.
struct CountingStore {
    inner: SqliteStore,
    datapoint_reads: AtomicUsize,
}

impl CountingStore {
    fn reads(&self) -> usize {
        self.datapoint_reads.load(Ordering::SeqCst)
    }
}

impl ResultStore for CountingStore {
    fn backend_name(&self) -> &'static str {
        "counting"
    }

    fn save(&self, suite_id: &str, test_id: &str, payload: &Value) -> StoreResult<String> {
        self.inner.save(suite_id, test_id, payload)
    }

    fn get_datapoint(
        &self,
        suite_id: &str,
        test_id: &str,
        datapoint_id: &str,
    ) -> StoreResult<Option<DatapointWithNeighbors>> {
        self.datapoint_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_datapoint(suite_id, test_id, datapoint_id)
    }

    fn list_suites(&self) -> StoreResult<BTreeSet<String>> {
        self.inner.list_suites()
    }

    fn list_tests_in_suite(&self, suite_id: &str) -> StoreResult<BTreeSet<String>> {
        self.inner.list_tests_in_suite(suite_id)
    }

    fn list_datapoints(&self, suite_id: &str, test_id: &str) -> StoreResult<Vec<Datapoint>> {
        self.datapoint_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_datapoints(suite_id, test_id)
    }
}

struct OfflineService;

#[async_trait]
impl TestService for OfflineService {
    async fn run_test(&self, _submission: &TestSubmission) -> Result<Value, ServiceError> {
        Err(ServiceError::Malformed("offline".into()))
    }
}

struct OfflineFetcher;

#[async_trait]
impl PageFetcher for OfflineFetcher {
    async fn fetch(&self, url: &str, _headers: &[(String, String)]) -> Result<String, PrepareError> {
        Err(PrepareError::Fetch {
            url: url.to_string(),
            message: "offline".into(),
        })
    }
}

fn test_config() -> Arc<AppConfig> {
    let doc = json!({
        "wptApiKey": "top-secret",
        "testSuites": [{
            "suiteId": "news",
            "testHost": "https://news.test",
            "chartConfig": [{"type": "SpeedIndex", "dataRange": [0, 5000]}],
            "testPages": [
                {"testId": "home", "testDisplayName": "Home page", "path": "/"},
                {"testId": "about", "path": "/about"}
            ]
        }]
    });
    Arc::new(AppConfig::from_json_str(&doc.to_string()).unwrap())
}

fn result_payload(fv: i64, rv: i64) -> Value {
    json!({
        "data": {
            "testUrl": "https://news.test/",
            "runs": {"1": {
                "firstView": {"SpeedIndex": fv, "images": {}},
                "repeatView": {"SpeedIndex": rv, "images": {}}
            }}
        }
    })
}

fn test_app(dev_mode: bool) -> (Router, Arc<CountingStore>) {
    let config = test_config();
    let counting = Arc::new(CountingStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        datapoint_reads: AtomicUsize::new(0),
    });
    let store: SharedStore = counting.clone();
    let runner = Arc::new(TestRunner::new(
        config.clone(),
        store.clone(),
        Arc::new(OfflineService),
        Arc::new(OfflineFetcher),
        Arc::new(SimpleSelectorResolver),
        Duration::from_secs(10),
    ));
    let state = Arc::new(AppState::new(config, store, runner, dev_mode));
    (build_router(state), counting)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let cache_control = response
        .headers()
        .get(header::CACHE_CONTROL)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, cache_control, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let (app, _) = test_app(false);
    let (status, _, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["availableEndpoints"]["/tests/:suiteId"].is_string());
}

#[tokio::test]
async fn test_suite_config_hides_api_keys() {
    let (app, _) = test_app(false);
    let (status, _, body) = get(&app, "/suite_config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["testSuites"][0]["suiteId"], "news");
    assert!(!body.to_string().contains("top-secret"));
}

#[tokio::test]
async fn test_run_tests_known_and_unknown_suite() {
    let (app, _) = test_app(false);

    let (status, _, body) = get(&app, "/run_tests/news").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "tests have started for news");

    let (status, _, body) = get(&app, "/run_tests/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_message"], "Unknown suite: nope");
    assert_eq!(body["error"], json!({}));
}

#[tokio::test]
async fn test_suite_charts() {
    let (app, store) = test_app(false);
    store.save("news", "home", &result_payload(1200, 800)).unwrap();
    // Outside the configured [0, 5000] SpeedIndex range.
    store.save("news", "home", &result_payload(9000, 800)).unwrap();

    let (status, cache_control, body) = get(&app, "/tests/news").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_control.as_deref(), Some("public, max-age=3600"));
    assert_eq!(body["suiteId"], "news");
    assert_eq!(body["tests"], json!(["home"]));
    assert_eq!(body["chartConfig"]["type"], "SpeedIndex");
    assert_eq!(body["chartConfig"]["dataRange"], json!([0.0, 5000.0]));
    assert_eq!(body["availableChartTypes"].as_array().unwrap().len(), 5);

    let chart = &body["charts"][0];
    assert_eq!(chart["testDisplayName"], "Home page");
    assert_eq!(chart["fvValues"].as_array().unwrap().len(), 1);
    assert_eq!(chart["rvValues"][0][1], 800);
}

#[tokio::test]
async fn test_repeat_request_served_from_cache() {
    let (app, store) = test_app(false);
    store.save("news", "home", &result_payload(1200, 800)).unwrap();

    let (_, _, first) = get(&app, "/tests/news?dateCutoff=7").await;
    let reads_after_first = store.reads();
    assert!(reads_after_first > 0);

    let (status, _, second) = get(&app, "/tests/news?dateCutoff=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(store.reads(), reads_after_first);

    // A different cutoff is a different key.
    let (_, _, third) = get(&app, "/tests/news?dateCutoff=8").await;
    assert!(store.reads() > reads_after_first);
    assert_eq!(third["chartConfig"]["dateCutoff"], 8);
}

#[tokio::test]
async fn test_huge_date_cutoff_is_answered() {
    let (app, store) = test_app(false);
    store.save("news", "home", &result_payload(1200, 800)).unwrap();

    let (status, _, body) = get(&app, "/tests/news?dateCutoff=1000000000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chartConfig"]["dateCutoff"], 1_000_000_000);
    assert_eq!(body["charts"][0]["fvValues"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_suite_is_404() {
    let (app, _) = test_app(false);
    let (status, cache_control, body) = get(&app, "/tests/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(cache_control.is_none());
    assert_eq!(body["error_message"], "Unknown suite: nope");
}

#[tokio::test]
async fn test_single_test_chart() {
    let (app, store) = test_app(false);
    let id = store.save("news", "home", &result_payload(1200, 800)).unwrap();

    let (status, _, body) = get(&app, "/tests/news/home?chartType=SpeedIndex").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["testConfig"]["path"], "/");
    assert_eq!(body["chart"]["datapoints"], json!([id]));
    assert_eq!(body["datapoints"][0]["datapointId"], id);

    // Configured but never run.
    let (status, _, body) = get(&app, "/tests/news/about").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["datapoints"].as_array().unwrap().is_empty());

    let (status, _, _) = get(&app, "/tests/news/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_datapoint_with_neighbours() {
    let (app, store) = test_app(false);
    let ids: Vec<String> = [1000, 1100, 1200]
        .iter()
        .map(|fv| store.save("news", "home", &result_payload(*fv, 700)).unwrap())
        .collect();

    let (status, _, body) = get(&app, &format!("/tests/news/home/{}", ids[1])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["datapointId"], ids[1].as_str());
    assert_eq!(body["testResults"], result_payload(1100, 700));
    assert_eq!(body["prevTest"]["datapointId"], ids[0].as_str());
    assert_eq!(body["nextTest"]["datapointId"], ids[2].as_str());
    assert_eq!(body["chart"]["fvValues"].as_array().unwrap().len(), 3);

    let (_, _, first) = get(&app, &format!("/tests/news/home/{}", ids[0])).await;
    assert!(first.get("prevTest").is_none());
    assert_eq!(first["nextTest"]["datapointId"], ids[1].as_str());
}

#[tokio::test]
async fn test_missing_datapoint_is_404() {
    let (app, store) = test_app(false);
    store.save("news", "home", &result_payload(1000, 700)).unwrap();

    let (status, _, body) = get(&app, "/tests/news/home/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!({}));
}

#[tokio::test]
async fn test_stored_listing() {
    let (app, store) = test_app(false);
    store.save("news", "home", &result_payload(1000, 700)).unwrap();
    store.save("news", "about", &result_payload(1000, 700)).unwrap();

    let (status, _, body) = get(&app, "/tests").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"suites": [{"suiteId": "news", "tests": ["about", "home"]}]})
    );
}

#[tokio::test]
async fn test_unknown_route_envelope() {
    let (app, _) = test_app(false);
    let (status, _, body) = get(&app, "/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error_message": "Not Found", "error": {}}));
}

#[tokio::test]
async fn test_dev_mode_exposes_error_detail() {
    let (app, _) = test_app(true);
    let (status, _, body) = get(&app, "/tests/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("UnknownSuite"));
}
