pub mod link;
pub mod prepare;
pub mod schedule;
pub mod throttle;

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use crate::store::SharedStore;
use crate::suite_config::{script_to_string, AppConfig, SuiteConfig};
use crate::wpt::validate::validate;
use crate::wpt::{strip_aggregates, TestResult, TestService, TestSubmission};
use link::LinkResolver;
use prepare::{prepare_suite, PageFetcher, PreparedPageConfig, PreparedTest};
use throttle::Throttle;

/// Drives one suite cycle: prepare → throttle → submit → validate → store.
pub struct TestRunner {
    config: Arc<AppConfig>,
    store: SharedStore,
    service: Arc<dyn TestService>,
    fetcher: Arc<dyn PageFetcher>,
    resolver: Arc<dyn LinkResolver>,
    throttle: Throttle,
}

impl TestRunner {
    pub fn new(
        config: Arc<AppConfig>,
        store: SharedStore,
        service: Arc<dyn TestService>,
        fetcher: Arc<dyn PageFetcher>,
        resolver: Arc<dyn LinkResolver>,
        min_spacing: Duration,
    ) -> Self {
        Self {
            config,
            store,
            service,
            fetcher,
            resolver,
            throttle: Throttle::new(min_spacing),
        }
    }

    /// Prepare every page of the suite, then hand each prepared test to its
    /// own task, started at its throttle slot. Returns once everything is
    /// dispatched; the handles resolve when the submissions finish.
    pub async fn run_cycle(self: &Arc<Self>, suite: &SuiteConfig) -> Vec<JoinHandle<()>> {
        info!("starting tests on {}", suite.suite_id);
        let prepared = prepare_suite(suite, self.fetcher.as_ref(), self.resolver.as_ref()).await;
        let api_key = self.config.api_key_for(suite);

        prepared
            .into_iter()
            .map(|test| {
                let delay = self.throttle.reserve_slot();
                let runner = Arc::clone(self);
                let api_key = api_key.clone();
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    runner.execute(test, api_key).await;
                })
            })
            .collect()
    }

    async fn execute(&self, test: PreparedTest, api_key: Option<String>) {
        let submission = TestSubmission {
            suite_id: test.page.suite_id.clone(),
            test_id: test.page.test_id.clone(),
            url: test.url.clone(),
            script: script_to_string(&test.script),
            location: test.page.location.clone(),
            first_view_only: test.page.first_view_only,
            api_key,
        };
        info!(
            "Submitting {}/{} ({}) location={:?}",
            submission.suite_id, submission.test_id, submission.url, submission.location
        );

        match self.service.run_test(&submission).await {
            Ok(payload) => {
                self.record_result(&test.page, payload);
            }
            Err(e) => {
                error!(
                    "Test run failed for {} (location={:?}, firstViewOnly={}): {}",
                    submission.url, submission.location, submission.first_view_only, e
                );
            }
        }
    }

    /// Validate and persist one completed result. Failures are logged and
    /// never reach the caller; returns the new datapoint id on success.
    pub fn record_result(&self, page: &PreparedPageConfig, mut payload: Value) -> Option<String> {
        let result = TestResult::from_payload(&payload);
        if let Err(e) = validate(&result, page.first_view_only) {
            error!(
                "Test died on {}: {}",
                result.test_url.as_deref().unwrap_or("<unknown url>"),
                e
            );
            return None;
        }

        strip_aggregates(&mut payload);
        match self.store.save(&page.suite_id, &page.test_id, &payload) {
            Ok(datapoint_id) => {
                info!(
                    "Saved results for {} as {}/{}/{}",
                    result.test_url.as_deref().unwrap_or("<unknown url>"),
                    page.suite_id,
                    page.test_id,
                    datapoint_id
                );
                Some(datapoint_id)
            }
            Err(e) => {
                error!(
                    "Failed to save results for {}/{} ({} store): {}",
                    page.suite_id,
                    page.test_id,
                    self.store.backend_name(),
                    e
                );
                None
            }
        }
    }
}
