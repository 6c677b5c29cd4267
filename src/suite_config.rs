//! The suite document: which pages to test, how often, and the chart defaults.
//!
//! Loaded once at startup and shared read-only for the life of the process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::chart::{DataRange, MetricType};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read suite config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse suite config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid suite config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub test_suites: Vec<SuiteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wpt_server: Option<String>,
    #[serde(default, skip_serializing)]
    pub wpt_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
    pub suite_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub test_host: String,
    pub test_pages: Vec<PageConfig>,
    #[serde(default)]
    pub chart_config: Vec<ChartTypeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_chart_type: Option<MetricType>,
    /// Minutes between scheduled runs. Unscheduled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_every: Option<u64>,
    #[serde(default, skip_serializing)]
    pub wpt_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string_data: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_request_user_agent: Option<String>,
    #[serde(
        default,
        rename = "SpeedIndexChartRange",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed_index_chart_range: Option<DataRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_href_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string_data: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_test_script: Option<Vec<ScriptStep>>,
    #[serde(default)]
    pub first_view_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_test_script: Option<Vec<ScriptStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_request_user_agent: Option<String>,
    #[serde(
        default,
        rename = "SpeedIndexChartRange",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed_index_chart_range: Option<DataRange>,
}

/// Per-metric chart defaults for a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartTypeConfig {
    #[serde(rename = "type")]
    pub chart_type: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_range: Option<DataRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_cutoff: Option<u32>,
}

/// One WebPageTest script command, written in config as a single-key object
/// such as `{"navigate": "https://example.com"}` or `{"setValue": ["id=q", "x"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ScriptStep {
    pub command: String,
    pub args: Vec<String>,
}

impl ScriptStep {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new("navigate", vec![url.into()])
    }

    pub fn log_data(enabled: bool) -> Self {
        Self::new("logData", vec![if enabled { "1" } else { "0" }.to_string()])
    }

    /// Tab-separated line in WPT script syntax.
    pub fn to_wpt_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push('\t');
            line.push_str(arg);
        }
        line
    }
}

/// Render a whole script in the text form WPT's `script` parameter expects.
pub fn script_to_string(steps: &[ScriptStep]) -> String {
    steps
        .iter()
        .map(ScriptStep::to_wpt_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

impl TryFrom<Value> for ScriptStep {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(map) = value else {
            return Err("script step must be an object".to_string());
        };
        if map.len() != 1 {
            return Err(format!(
                "script step must have exactly one command, found {}",
                map.len()
            ));
        }
        let Some((command, raw_args)) = map.into_iter().next() else {
            return Err("script step must have exactly one command".to_string());
        };
        let args = match raw_args {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().map(arg_to_string).collect(),
            single => vec![arg_to_string(&single)],
        };
        Ok(ScriptStep { command, args })
    }
}

impl From<ScriptStep> for Value {
    fn from(step: ScriptStep) -> Self {
        let args = match step.args.len() {
            0 => Value::Null,
            1 => Value::String(step.args.into_iter().next().unwrap_or_default()),
            _ => Value::Array(step.args.into_iter().map(Value::String).collect()),
        };
        let mut map = serde_json::Map::new();
        map.insert(step.command, args);
        Value::Object(map)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut suite_ids = HashSet::new();
        for suite in &self.test_suites {
            if suite.suite_id.is_empty() {
                return Err(ConfigError::Invalid("suite with empty suiteId".into()));
            }
            if !suite_ids.insert(suite.suite_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate suiteId '{}'",
                    suite.suite_id
                )));
            }
            if suite.run_every == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "suite '{}' has runEvery of 0 minutes",
                    suite.suite_id
                )));
            }

            let mut test_ids = HashSet::new();
            for page in &suite.test_pages {
                if !test_ids.insert(page.test_id.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate testId '{}' in suite '{}'",
                        page.test_id, suite.suite_id
                    )));
                }
                page.validate(&suite.suite_id)?;
            }
        }
        Ok(())
    }

    pub fn find_suite(&self, suite_id: &str) -> Option<&SuiteConfig> {
        self.test_suites.iter().find(|s| s.suite_id == suite_id)
    }

    pub fn wpt_server(&self) -> &str {
        self.wpt_server.as_deref().unwrap_or(crate::config::DEFAULT_WPT_SERVER)
    }

    /// Suite-level credentials win over the document-level key.
    pub fn api_key_for(&self, suite: &SuiteConfig) -> Option<String> {
        suite
            .wpt_api_key
            .clone()
            .or_else(|| self.wpt_api_key.clone())
    }
}

impl SuiteConfig {
    pub fn find_page(&self, test_id: &str) -> Option<&PageConfig> {
        self.test_pages.iter().find(|p| p.test_id == test_id)
    }

    pub fn chart_defaults(&self, metric: MetricType) -> Option<&ChartTypeConfig> {
        self.chart_config.iter().find(|c| c.chart_type == metric)
    }
}

impl PageConfig {
    pub fn is_parent_page(&self) -> bool {
        self.parent_path.is_some() && self.parent_href_selector.is_some()
    }

    fn validate(&self, suite_id: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid(format!(
                "page '{}' in suite '{}' {}",
                self.test_id, suite_id, reason
            )))
        };

        if self.test_id.is_empty() {
            return invalid("has an empty testId");
        }
        if self.parent_path.is_some() != self.parent_href_selector.is_some() {
            return invalid("needs both parentPath and parentHrefSelector");
        }
        if self.path.is_some() && self.is_parent_page() {
            return invalid("sets both path and parentPath");
        }
        if self.path.is_none() && !self.is_parent_page() && self.full_test_script.is_none() {
            return invalid("needs a path, a parentPath or a fullTestScript");
        }
        Ok(())
    }
}
