use axum::Json;
use serde_json::{json, Value};

pub async fn info() -> Json<Value> {
    Json(json!({
        "availableEndpoints": {
            "/suite_config": "The active suite configuration",
            "/run_tests/:suiteId": "Start a test cycle for a suite",
            "/tests": "Suites and tests that have stored results",
            "/tests/:suiteId": "Charts for every test in a suite",
            "/tests/:suiteId/:testId": "Chart and datapoints for one test",
            "/tests/:suiteId/:testId/:datapointId": "One stored result with its neighbours",
        }
    }))
}
