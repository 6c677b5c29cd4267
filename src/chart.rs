//! Turns stored datapoints into chart series.
//!
//! Everything here is pure: the caller supplies `now`, so identical inputs
//! always produce identical output.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::config::DEFAULT_DATE_CUTOFF_DAYS;
use crate::store::Datapoint;
use crate::suite_config::{PageConfig, SuiteConfig};
use crate::wpt::{parse_int_prefix, TestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    SpeedIndex,
    #[serde(rename = "loadTime")]
    LoadTime,
    #[serde(rename = "fullyLoaded")]
    FullyLoaded,
    #[serde(rename = "TTFB")]
    Ttfb,
    #[serde(rename = "visualComplete")]
    VisualComplete,
}

pub const AVAILABLE_CHART_TYPES: &[MetricType] = &[
    MetricType::SpeedIndex,
    MetricType::LoadTime,
    MetricType::FullyLoaded,
    MetricType::Ttfb,
    MetricType::VisualComplete,
];

impl MetricType {
    /// Field name of the metric inside a WPT view object.
    pub fn field_name(self) -> &'static str {
        match self {
            MetricType::SpeedIndex => "SpeedIndex",
            MetricType::LoadTime => "loadTime",
            MetricType::FullyLoaded => "fullyLoaded",
            MetricType::Ttfb => "TTFB",
            MetricType::VisualComplete => "visualComplete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AVAILABLE_CHART_TYPES
            .iter()
            .copied()
            .find(|m| m.field_name() == name)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Exclusive value bounds. JSON form is `[min, max]`; `null` stands for an
/// unbounded side, which is also how an infinite bound serializes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRange {
    pub min: f64,
    pub max: f64,
}

impl DataRange {
    pub const UNBOUNDED_ABOVE_ZERO: DataRange = DataRange {
        min: 0.0,
        max: f64::INFINITY,
    };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains_exclusive(&self, value: f64) -> bool {
        value > self.min && value < self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min < self.max
    }
}

impl Serialize for DataRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.min, self.max).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (min, max) = <(Option<f64>, Option<f64>)>::deserialize(deserializer)?;
        Ok(DataRange {
            min: min.unwrap_or(f64::NEG_INFINITY),
            max: max.unwrap_or(f64::INFINITY),
        })
    }
}

/// Raw chart query parameters as they arrive on the URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartQuery {
    pub chart_type: Option<String>,
    pub data_range: Option<String>,
    pub date_cutoff: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequestConfig {
    #[serde(rename = "type")]
    pub metric: MetricType,
    pub date_cutoff: u32,
    pub data_range: DataRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub suite_id: String,
    pub test_id: String,
    pub test_display_name: Option<String>,
    pub fv_values: Vec<(i64, i64)>,
    pub rv_values: Vec<(i64, i64)>,
    pub datapoints: Vec<String>,
}

pub fn make_type(requested: Option<&str>, fallback: MetricType) -> MetricType {
    requested.and_then(MetricType::from_name).unwrap_or(fallback)
}

/// Parse `"min,max"`. A side that is not an integer becomes `+∞`; the range
/// is only used when both sides are present and `min < max`, otherwise the
/// suite default (or `[0, ∞)`).
pub fn make_data_range(raw: Option<&str>, suite_default: Option<DataRange>) -> DataRange {
    let fallback = suite_default.unwrap_or(DataRange::UNBOUNDED_ABOVE_ZERO);
    let bound = |part: &str| parse_int_prefix(part).map_or(f64::INFINITY, |v| v as f64);

    let mut parts = raw.unwrap_or("0,0").split(',');
    let (Some(min), Some(max)) = (parts.next(), parts.next()) else {
        return fallback;
    };

    let requested = DataRange::new(bound(min), bound(max));
    if requested.is_valid() {
        requested
    } else {
        fallback
    }
}

pub fn make_date_cutoff(raw: Option<&str>, suite_default: Option<u32>) -> u32 {
    let fallback = suite_default
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_DATE_CUTOFF_DAYS);
    raw.and_then(parse_int_prefix)
        .filter(|d| *d > 0)
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(fallback)
}

/// Resolve the query against the suite's per-metric defaults.
pub fn build_chart_config(suite: &SuiteConfig, query: &ChartQuery) -> ChartRequestConfig {
    let fallback_type = suite.default_chart_type.unwrap_or(MetricType::SpeedIndex);
    let metric = make_type(query.chart_type.as_deref(), fallback_type);
    let defaults = suite.chart_defaults(metric);

    let default_range = defaults.and_then(|c| c.data_range).or_else(|| {
        if metric == MetricType::SpeedIndex {
            suite.speed_index_chart_range
        } else {
            None
        }
    });

    ChartRequestConfig {
        metric,
        date_cutoff: make_date_cutoff(
            query.date_cutoff.as_deref(),
            defaults.and_then(|c| c.date_cutoff),
        ),
        data_range: make_data_range(query.data_range.as_deref(), default_range),
    }
}

pub fn build_series(
    suite_id: &str,
    page: &PageConfig,
    datapoints: &[Datapoint],
    request: &ChartRequestConfig,
    now: DateTime<Utc>,
) -> ChartSeries {
    let mut chart = ChartSeries {
        suite_id: suite_id.to_string(),
        test_id: page.test_id.clone(),
        test_display_name: page.test_display_name.clone(),
        fv_values: Vec::new(),
        rv_values: Vec::new(),
        datapoints: Vec::new(),
    };
    // A cutoff reaching past the representable range keeps everything.
    let cutoff = Duration::try_days(i64::from(request.date_cutoff))
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let field = request.metric.field_name();

    for dp in datapoints {
        if dp.captured_at < cutoff {
            continue;
        }

        let result = TestResult::from_payload(&dp.payload);
        let Some(fv) = result.first_view.as_ref().and_then(|v| v.metric(field)) else {
            continue;
        };
        if !request.data_range.contains_exclusive(fv as f64) {
            continue;
        }

        let rv = if page.first_view_only {
            None
        } else {
            match result.repeat_view.as_ref().and_then(|v| v.metric(field)) {
                Some(rv) if request.data_range.contains_exclusive(rv as f64) => Some(rv),
                _ => continue,
            }
        };

        let ts = dp.captured_at.timestamp_millis();
        chart.fv_values.push((ts, fv));
        if let Some(rv) = rv {
            chart.rv_values.push((ts, rv));
        }
        chart.datapoints.push(dp.datapoint_id.clone());
    }

    chart
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn datapoint(id: &str, captured_at: DateTime<Utc>, fv: i64, rv: Option<i64>) -> Datapoint {
        let mut run = json!({
            "firstView": {"SpeedIndex": fv, "loadTime": fv * 2, "images": {}}
        });
        if let Some(rv) = rv {
            run["repeatView"] = json!({"SpeedIndex": rv, "loadTime": rv * 2, "images": {}});
        }
        Datapoint {
            suite_id: "suite".into(),
            test_id: "home".into(),
            datapoint_id: id.into(),
            captured_at,
            payload: json!({"data": {"runs": {"1": run}}}),
        }
    }

    fn page(first_view_only: bool) -> PageConfig {
        PageConfig {
            test_id: "home".into(),
            test_display_name: Some("Home".into()),
            path: Some("/".into()),
            first_view_only,
            ..Default::default()
        }
    }

    fn request(metric: MetricType, min: f64, max: f64) -> ChartRequestConfig {
        ChartRequestConfig {
            metric,
            date_cutoff: 30,
            data_range: DataRange::new(min, max),
        }
    }

    #[test]
    fn test_make_type_falls_back_on_unknown() {
        assert_eq!(make_type(Some("TTFB"), MetricType::SpeedIndex), MetricType::Ttfb);
        assert_eq!(
            make_type(Some("bogus"), MetricType::LoadTime),
            MetricType::LoadTime
        );
        assert_eq!(make_type(None, MetricType::SpeedIndex), MetricType::SpeedIndex);
    }

    #[test]
    fn test_make_data_range_inverted_uses_default() {
        let suite_default = DataRange::new(100.0, 5000.0);
        assert_eq!(make_data_range(Some("50,10"), Some(suite_default)), suite_default);
        assert_eq!(
            make_data_range(Some("50,10"), None),
            DataRange::UNBOUNDED_ABOVE_ZERO
        );
    }

    #[test]
    fn test_make_data_range_valid_and_infinity_sentinel() {
        assert_eq!(make_data_range(Some("10,50"), None), DataRange::new(10.0, 50.0));
        let open = make_data_range(Some("10,abc"), None);
        assert_eq!(open.min, 10.0);
        assert!(open.max.is_infinite());
        assert_eq!(make_data_range(None, None), DataRange::UNBOUNDED_ABOVE_ZERO);
    }

    #[test]
    fn test_make_data_range_single_side_uses_default() {
        let suite_default = DataRange::new(100.0, 5000.0);
        assert_eq!(make_data_range(Some("10"), Some(suite_default)), suite_default);
        assert_eq!(make_data_range(Some(""), None), DataRange::UNBOUNDED_ABOVE_ZERO);
    }

    #[test]
    fn test_make_date_cutoff() {
        assert_eq!(make_date_cutoff(Some("7"), None), 7);
        assert_eq!(make_date_cutoff(Some("nope"), Some(14)), 14);
        assert_eq!(make_date_cutoff(Some("0"), None), DEFAULT_DATE_CUTOFF_DAYS);
        assert_eq!(make_date_cutoff(None, None), DEFAULT_DATE_CUTOFF_DAYS);
    }

    #[test]
    fn test_data_range_serializes_infinity_as_null() {
        let json = serde_json::to_value(DataRange::UNBOUNDED_ABOVE_ZERO).unwrap();
        assert_eq!(json, json!([0.0, null]));
        let back: DataRange = serde_json::from_value(json).unwrap();
        assert_eq!(back, DataRange::UNBOUNDED_ABOVE_ZERO);
    }

    #[test]
    fn test_build_series_filters_by_age_and_range() {
        let now = Utc::now();
        let points = vec![
            datapoint("1", now - Duration::days(40), 1000, Some(800)),
            datapoint("2", now - Duration::days(2), 1200, Some(900)),
            datapoint("3", now - Duration::days(1), 0, Some(700)),
            datapoint("4", now - Duration::hours(1), 1100, Some(9000)),
            datapoint("5", now - Duration::minutes(5), 1300, Some(950)),
        ];
        let chart = build_series(
            "suite",
            &page(false),
            &points,
            &request(MetricType::SpeedIndex, 0.0, 5000.0),
            now,
        );

        assert_eq!(chart.datapoints, vec!["2", "5"]);
        assert_eq!(chart.fv_values.len(), 2);
        assert_eq!(chart.fv_values[0].1, 1200);
        assert_eq!(chart.rv_values[1].1, 950);
        assert_eq!(
            chart.fv_values[0].0,
            (now - Duration::days(2)).timestamp_millis()
        );
    }

    #[test]
    fn test_build_series_bounds_are_exclusive() {
        let now = Utc::now();
        let points = vec![datapoint("1", now, 500, None)];
        let chart = build_series(
            "suite",
            &page(true),
            &points,
            &request(MetricType::SpeedIndex, 500.0, 1000.0),
            now,
        );
        assert!(chart.datapoints.is_empty());
    }

    #[test]
    fn test_build_series_first_view_only_ignores_repeat_view() {
        let now = Utc::now();
        let points = vec![datapoint("1", now, 1500, None)];
        let chart = build_series(
            "suite",
            &page(true),
            &points,
            &request(MetricType::LoadTime, 0.0, f64::INFINITY),
            now,
        );
        assert_eq!(chart.fv_values, vec![(now.timestamp_millis(), 3000)]);
        assert!(chart.rv_values.is_empty());
    }

    #[test]
    fn test_build_series_huge_cutoff_keeps_everything() {
        let now = Utc::now();
        let points = vec![
            datapoint("1", now - Duration::days(4000), 1000, None),
            datapoint("2", now, 1100, None),
        ];
        let suite: SuiteConfig = serde_json::from_value(json!({
            "suiteId": "suite",
            "testHost": "https://x.test",
            "testPages": []
        }))
        .unwrap();
        let query = ChartQuery {
            date_cutoff: Some("1000000000".into()),
            ..ChartQuery::default()
        };
        let req = build_chart_config(&suite, &query);
        assert_eq!(req.date_cutoff, 1_000_000_000);

        let chart = build_series("suite", &page(true), &points, &req, now);
        assert_eq!(chart.datapoints, vec!["1", "2"]);

        let max = ChartRequestConfig {
            date_cutoff: u32::MAX,
            ..req
        };
        let chart = build_series("suite", &page(true), &points, &max, now);
        assert_eq!(chart.datapoints.len(), 2);
    }

    #[test]
    fn test_build_series_is_pure() {
        let now = Utc::now();
        let points = vec![
            datapoint("1", now - Duration::hours(3), 1000, Some(900)),
            datapoint("2", now - Duration::hours(2), 1100, Some(950)),
        ];
        let req = request(MetricType::SpeedIndex, 0.0, f64::INFINITY);
        let first = build_series("suite", &page(false), &points, &req, now);
        let second = build_series("suite", &page(false), &points, &req, now);
        assert_eq!(first, second);
    }
}
