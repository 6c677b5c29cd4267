use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use super::TestRunner;
use crate::suite_config::{AppConfig, SuiteConfig};

/// Run `suite` now and then every `runEvery` minutes. Suites without an
/// interval are only run on request.
pub fn spawn_suite_schedule(
    runner: Arc<TestRunner>,
    suite: SuiteConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    let minutes = suite.run_every?;
    Some(tokio::spawn(async move {
        info!(
            "Setting test run for {} every {} minutes",
            suite.suite_id, minutes
        );
        let mut ticker = interval(Duration::from_secs(minutes * 60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // First tick completes immediately.
            ticker.tick().await;
            info!("running scheduled tests for {}", suite.suite_id);
            runner.run_cycle(&suite).await;
        }
    }))
}

pub fn spawn_all_schedules(
    runner: &Arc<TestRunner>,
    config: &AppConfig,
) -> Vec<tokio::task::JoinHandle<()>> {
    config
        .test_suites
        .iter()
        .filter_map(|suite| spawn_suite_schedule(Arc::clone(runner), suite.clone()))
        .collect()
}
