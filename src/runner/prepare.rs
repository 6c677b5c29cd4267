//! Page definition → concrete WPT script.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::link::LinkResolver;
use crate::chart::DataRange;
use crate::config::PAGE_FETCH_TIMEOUT_SECS;
use crate::suite_config::{PageConfig, ScriptStep, SuiteConfig};

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("Failed to fetch parent page {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("No link matching '{selector}' on {url}")]
    LinkNotFound { url: String, selector: String },
}

/// Fetches the HTML of a parent page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, PrepareError>;
}

pub struct HttpPageFetcher {
    http: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, PrepareError> {
        let fetch_err = |e: reqwest::Error| PrepareError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };
        let mut request = self
            .http
            .get(url)
            .timeout(Duration::from_secs(PAGE_FETCH_TIMEOUT_SECS));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request
            .send()
            .await
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?;
        resp.text().await.map_err(fetch_err)
    }
}

// ============================================================================
// Prepared model
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PageTarget {
    FullScript(Vec<ScriptStep>),
    Path(String),
    Parent { path: String, selector: String },
}

/// A page with the suite defaults folded in.
#[derive(Debug, Clone)]
pub struct PreparedPageConfig {
    pub suite_id: String,
    pub test_id: String,
    pub test_display_name: Option<String>,
    pub target: PageTarget,
    pub test_host: String,
    pub query_string_data: BTreeMap<String, Value>,
    pub headers: Vec<(String, String)>,
    pub location: Option<String>,
    pub first_view_only: bool,
    pub pre_test_script: Vec<ScriptStep>,
    pub speed_index_chart_range: Option<DataRange>,
}

/// Ready for submission; discarded once submitted.
#[derive(Debug, Clone)]
pub struct PreparedTest {
    pub page: PreparedPageConfig,
    pub url: String,
    pub script: Vec<ScriptStep>,
}

pub fn inherit_defaults(suite: &SuiteConfig, page: &PageConfig) -> PreparedPageConfig {
    let target = if let Some(script) = &page.full_test_script {
        PageTarget::FullScript(script.clone())
    } else if let (Some(path), Some(selector)) = (&page.parent_path, &page.parent_href_selector) {
        PageTarget::Parent {
            path: path.clone(),
            selector: selector.clone(),
        }
    } else {
        PageTarget::Path(page.path.clone().unwrap_or_default())
    };

    let user_agent = page
        .parent_request_user_agent
        .as_ref()
        .or(suite.parent_request_user_agent.as_ref());

    PreparedPageConfig {
        suite_id: suite.suite_id.clone(),
        test_id: page.test_id.clone(),
        test_display_name: page.test_display_name.clone(),
        target,
        test_host: page
            .test_host
            .clone()
            .unwrap_or_else(|| suite.test_host.clone()),
        query_string_data: page
            .query_string_data
            .as_ref()
            .or(suite.query_string_data.as_ref())
            .cloned()
            .unwrap_or_default(),
        headers: user_agent
            .map(|ua| vec![("User-Agent".to_string(), ua.clone())])
            .unwrap_or_default(),
        location: page.location.clone().or_else(|| suite.location.clone()),
        first_view_only: page.first_view_only,
        pre_test_script: page.pre_test_script.clone().unwrap_or_default(),
        speed_index_chart_range: page.speed_index_chart_range.or(suite.speed_index_chart_range),
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Append query data with `&` when `base` already has a query string, `?` otherwise.
pub fn append_query(base: String, query: &BTreeMap<String, Value>) -> String {
    if query.is_empty() {
        return base;
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), query_value(v))))
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, encoded)
}

pub fn make_test_url(host: &str, path: &str, query: &BTreeMap<String, Value>) -> String {
    append_query(format!("{}{}", host, path), query)
}

/// Resolve a link found on a parent page against the test host.
fn resolve_href(host: &str, href: &str) -> String {
    match Url::parse(host).and_then(|base| base.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}{}", host, href),
    }
}

/// `navigate` to the URL, preceded by the pre-test steps with result
/// logging switched off around them.
pub fn build_test_script(pre_test_script: &[ScriptStep], url: &str) -> Vec<ScriptStep> {
    let mut script = Vec::with_capacity(pre_test_script.len() + 3);
    if !pre_test_script.is_empty() {
        script.push(ScriptStep::log_data(false));
        script.extend(pre_test_script.iter().cloned());
        script.push(ScriptStep::log_data(true));
    }
    script.push(ScriptStep::navigate(url));
    script
}

pub async fn prepare_test(
    page: PreparedPageConfig,
    fetcher: &dyn PageFetcher,
    resolver: &dyn LinkResolver,
) -> Result<PreparedTest, PrepareError> {
    let (url, script) = match &page.target {
        PageTarget::FullScript(script) => {
            let url = script
                .iter()
                .find(|s| s.command.eq_ignore_ascii_case("navigate"))
                .and_then(|s| s.args.first().cloned())
                .unwrap_or_else(|| page.test_host.clone());
            (url, script.clone())
        }
        PageTarget::Path(path) => {
            let url = make_test_url(&page.test_host, path, &page.query_string_data);
            let script = build_test_script(&page.pre_test_script, &url);
            (url, script)
        }
        PageTarget::Parent { path, selector } => {
            let parent_url = format!("{}{}", page.test_host, path);
            let body = fetcher.fetch(&parent_url, &page.headers).await?;
            let href = resolver
                .resolve(&body, selector)
                .ok_or_else(|| PrepareError::LinkNotFound {
                    url: parent_url.clone(),
                    selector: selector.clone(),
                })?;
            debug!("Parent page {} links to {}", parent_url, href);
            let url = append_query(resolve_href(&page.test_host, &href), &page.query_string_data);
            let script = build_test_script(&page.pre_test_script, &url);
            (url, script)
        }
    };

    Ok(PreparedTest { page, url, script })
}

/// Prepare every page of a suite concurrently. Pages that fail are logged
/// and left out of this cycle.
pub async fn prepare_suite(
    suite: &SuiteConfig,
    fetcher: &dyn PageFetcher,
    resolver: &dyn LinkResolver,
) -> Vec<PreparedTest> {
    let pending = suite
        .test_pages
        .iter()
        .map(|page| prepare_test(inherit_defaults(suite, page), fetcher, resolver));

    join_all(pending)
        .await
        .into_iter()
        .zip(&suite.test_pages)
        .filter_map(|(result, page)| match result {
            Ok(test) => Some(test),
            Err(e) => {
                warn!(
                    "Skipping {}/{} this cycle: {}",
                    suite.suite_id, page.test_id, e
                );
                None
            }
        })
        .collect()
}
