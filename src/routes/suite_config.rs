use axum::extract::State;
use axum::Json;

use crate::state::SharedState;
use crate::suite_config::AppConfig;

/// The loaded suite document. API keys are never serialized.
pub async fn suite_config(State(state): State<SharedState>) -> Json<AppConfig> {
    Json(state.config.as_ref().clone())
}
