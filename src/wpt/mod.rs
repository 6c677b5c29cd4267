pub mod client;
pub mod validate;

use async_trait::async_trait;
use serde_json::{Map, Value};

// ============================================================================
// External service contract
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Test service rejected request ({status_code}): {status_text}")]
    Rejected { status_code: i64, status_text: String },

    #[error("Timed out after {0}s waiting for test results")]
    Timeout(u64),

    #[error("Malformed test service response: {0}")]
    Malformed(String),
}

/// Everything the test service needs to run one prepared test.
#[derive(Debug, Clone)]
pub struct TestSubmission {
    pub suite_id: String,
    pub test_id: String,
    /// The navigated URL, kept for log context.
    pub url: String,
    pub script: String,
    pub location: Option<String>,
    pub first_view_only: bool,
    pub api_key: Option<String>,
}

/// Submit a script, wait for the test to finish and hand back the raw result payload.
#[async_trait]
pub trait TestService: Send + Sync {
    async fn run_test(&self, submission: &TestSubmission) -> Result<Value, ServiceError>;
}

// ============================================================================
// Normalised result
// ============================================================================

/// Tolerant, read-only view over a raw WPT result payload.
///
/// Accepts `data.runs["1"]`, `data.runs[1]`, `data.run` and
/// `response.data.run`; everything else about the payload is left opaque.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub test_url: Option<String>,
    pub run_present: bool,
    pub first_view: Option<ViewResult>,
    pub repeat_view: Option<ViewResult>,
}

#[derive(Debug, Clone)]
pub struct ViewResult {
    fields: Map<String, Value>,
}

impl ViewResult {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|fields| ViewResult {
            fields: fields.clone(),
        })
    }

    pub fn has_images(&self) -> bool {
        self.fields.get("images").is_some_and(Value::is_object)
    }

    /// Integer value of a metric; numeric strings are accepted.
    pub fn metric(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            Value::String(s) => parse_int_prefix(s),
            _ => None,
        }
    }
}

fn locate_data(payload: &Value) -> Option<&Value> {
    payload
        .get("data")
        .filter(|d| d.is_object())
        .or_else(|| payload.pointer("/response/data"))
}

fn locate_data_mut(payload: &mut Value) -> Option<&mut Map<String, Value>> {
    if payload.get("data").is_some_and(Value::is_object) {
        return payload.get_mut("data").and_then(Value::as_object_mut);
    }
    payload
        .pointer_mut("/response/data")
        .and_then(Value::as_object_mut)
}

fn locate_run(data: &Value) -> Option<&Value> {
    let run = match data.get("runs") {
        Some(Value::Object(runs)) => runs.get("1"),
        Some(Value::Array(runs)) => runs.get(1),
        _ => match data.get("run") {
            Some(Value::Array(runs)) => runs.first(),
            other => other,
        },
    };
    run.filter(|r| r.is_object())
}

impl TestResult {
    pub fn from_payload(payload: &Value) -> Self {
        let Some(data) = locate_data(payload) else {
            return TestResult::default();
        };

        let test_url = data
            .get("testUrl")
            .or_else(|| data.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let run = locate_run(data);

        TestResult {
            test_url,
            run_present: run.is_some(),
            first_view: run
                .and_then(|r| r.get("firstView"))
                .and_then(ViewResult::from_value),
            repeat_view: run
                .and_then(|r| r.get("repeatView"))
                .and_then(ViewResult::from_value),
        }
    }
}

/// Drop the aggregate statistics WPT attaches next to the per-run data.
pub fn strip_aggregates(payload: &mut Value) {
    if let Some(data) = locate_data_mut(payload) {
        for key in ["average", "median", "standardDeviation"] {
            data.remove(key);
        }
    }
}

/// Leading-integer parse: optional whitespace and sign, then digits.
/// `"1234ms"` is 1234, `"abc"` is `None`.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}
