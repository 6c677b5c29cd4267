use super::{TestResult, ViewResult};

/// Primary timing metric every stored view must carry.
const PRIMARY_METRIC: &str = "SpeedIndex";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no {0}")]
    Missing(&'static str),
}

/// Structural gate in front of the store. Checks run in order and the first
/// failure names the missing field.
pub fn validate(result: &TestResult, first_view_only: bool) -> Result<(), ValidationError> {
    if !result.run_present {
        return Err(ValidationError::Missing("data.runs[1]"));
    }

    check_view(
        result.first_view.as_ref(),
        [
            "data.runs[1].firstView",
            "data.runs[1].firstView.images",
            "data.runs[1].firstView.SpeedIndex",
        ],
    )?;

    if !first_view_only {
        check_view(
            result.repeat_view.as_ref(),
            [
                "data.runs[1].repeatView",
                "data.runs[1].repeatView.images",
                "data.runs[1].repeatView.SpeedIndex",
            ],
        )?;
    }

    Ok(())
}

fn check_view(view: Option<&ViewResult>, fields: [&'static str; 3]) -> Result<(), ValidationError> {
    let [view_field, images_field, metric_field] = fields;
    let view = view.ok_or(ValidationError::Missing(view_field))?;
    if !view.has_images() {
        return Err(ValidationError::Missing(images_field));
    }
    // Zero is WPT's "never measured" value.
    if view.metric(PRIMARY_METRIC).unwrap_or(0) == 0 {
        return Err(ValidationError::Missing(metric_field));
    }
    Ok(())
}
