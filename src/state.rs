use std::sync::Arc;
use tokio::time::Duration;

use crate::cache::ResponseCache;
use crate::config::RESPONSE_CACHE_TTL_SECS;
use crate::runner::TestRunner;
use crate::store::SharedStore;
use crate::suite_config::AppConfig;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: SharedStore,
    pub cache: Arc<ResponseCache>,
    pub runner: Arc<TestRunner>,
    pub dev_mode: bool,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: SharedStore,
        runner: Arc<TestRunner>,
        dev_mode: bool,
    ) -> Self {
        Self {
            config,
            store,
            cache: Arc::new(ResponseCache::new(Duration::from_secs(
                RESPONSE_CACHE_TTL_SECS,
            ))),
            runner,
            dev_mode,
        }
    }
}

pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("wpt-charts/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .build()
}
