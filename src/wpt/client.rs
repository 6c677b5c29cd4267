use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{ServiceError, TestService, TestSubmission};
use crate::config::{
    WPT_POLL_INTERVAL_SECS, WPT_REQUEST_TIMEOUT_SECS, WPT_TEST_TIMEOUT_SECS,
};

/// Envelope shared by every WPT JSON API response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WptEnvelope {
    status_code: i64,
    #[serde(default)]
    status_text: String,
    #[serde(default)]
    data: Value,
}

/// WebPageTest HTTP API client: `runtest.php`, then `testStatus.php` until
/// done, then `jsonResult.php`.
pub struct WptClient {
    http: reqwest::Client,
    server: Url,
    poll_interval: Duration,
    timeout: Duration,
}

impl WptClient {
    pub fn new(http: reqwest::Client, server: &str) -> Result<Self, ServiceError> {
        let mut base = server.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let server = Url::parse(&base)
            .map_err(|e| ServiceError::Malformed(format!("bad WPT server url {}: {}", server, e)))?;
        Ok(Self {
            http,
            server,
            poll_interval: Duration::from_secs(WPT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(WPT_TEST_TIMEOUT_SECS),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<Url, ServiceError> {
        let mut url = self
            .server
            .join(name)
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get_envelope(&self, url: Url) -> Result<WptEnvelope, ServiceError> {
        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(WPT_REQUEST_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        serde_json::from_value(body).map_err(|e| ServiceError::Malformed(e.to_string()))
    }

    async fn submit(&self, submission: &TestSubmission) -> Result<String, ServiceError> {
        let fvonly = if submission.first_view_only { "1" } else { "0" };
        let mut params = vec![
            ("f", "json"),
            ("script", submission.script.as_str()),
            ("fvonly", fvonly),
            // filmstrip capture
            ("video", "1"),
            // skip per-request details
            ("requests", "0"),
        ];
        if let Some(location) = submission.location.as_deref() {
            params.push(("location", location));
        }
        if let Some(key) = submission.api_key.as_deref() {
            params.push(("k", key));
        }

        let envelope = self.get_envelope(self.endpoint("runtest.php", &params)?).await?;
        if envelope.status_code != 200 {
            return Err(ServiceError::Rejected {
                status_code: envelope.status_code,
                status_text: envelope.status_text,
            });
        }
        envelope
            .data
            .get("testId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Malformed("runtest response has no data.testId".into()))
    }

    async fn wait_for_completion(&self, test_id: &str) -> Result<(), ServiceError> {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let url = self.endpoint("testStatus.php", &[("f", "json"), ("test", test_id)])?;
            let status = self.get_envelope(url).await?;
            match status.status_code {
                200 => return Ok(()),
                100..=199 => debug!("WPT test {} pending: {}", test_id, status.status_text),
                code => {
                    return Err(ServiceError::Rejected {
                        status_code: code,
                        status_text: status.status_text,
                    })
                }
            }
        }
    }

    async fn fetch_result(&self, test_id: &str) -> Result<Value, ServiceError> {
        let url = self.endpoint("jsonResult.php", &[("test", test_id)])?;
        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(WPT_REQUEST_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl TestService for WptClient {
    async fn run_test(&self, submission: &TestSubmission) -> Result<Value, ServiceError> {
        let test_id = self.submit(submission).await?;
        info!(
            "WPT test {} submitted for {}/{} ({})",
            test_id, submission.suite_id, submission.test_id, submission.url
        );

        tokio::time::timeout(self.timeout, self.wait_for_completion(&test_id))
            .await
            .map_err(|_| ServiceError::Timeout(self.timeout.as_secs()))??;

        self.fetch_result(&test_id).await
    }
}
