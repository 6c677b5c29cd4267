use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ErrorResponse};
use crate::routes::{info, run_tests, suite_config, tests};
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(info::info))
        .route("/suite_config", get(suite_config::suite_config))
        .route("/run_tests/{suite_id}", get(run_tests::run_tests))
        // Stored results and charts
        .route("/tests", get(tests::list_stored))
        .route("/tests/{suite_id}", get(tests::suite_charts))
        .route("/tests/{suite_id}/{test_id}", get(tests::test_chart))
        .route(
            "/tests/{suite_id}/{test_id}/{datapoint_id}",
            get(tests::datapoint),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn not_found(State(state): State<SharedState>) -> ErrorResponse {
    ApiError::NotFound.envelope(state.dev_mode)
}
