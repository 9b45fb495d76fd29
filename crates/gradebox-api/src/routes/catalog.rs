//! Test catalog and course readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use gradebox_core::catalog::Test;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tests", get(list_tests).put(update_tests))
        .route("/course", get(get_course).put(update_course))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CourseStatus {
    pub ready: bool,
}

async fn list_tests(State(state): State<AppState>) -> Result<Json<Vec<Test>>, ApiError> {
    Ok(Json(state.catalog.list_tests().await?))
}

/// Replace the catalog; tests missing from the list are soft-deleted.
async fn update_tests(
    State(state): State<AppState>,
    Json(tests): Json<Vec<Test>>,
) -> Result<StatusCode, ApiError> {
    if tests.iter().any(|t| t.name.is_empty()) {
        return Err(ApiError::BadRequest("test name cannot be empty".to_string()));
    }
    state.catalog.update_tests(&tests).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_course(State(state): State<AppState>) -> Result<Json<CourseStatus>, ApiError> {
    Ok(Json(CourseStatus {
        ready: state.catalog.is_ready().await?,
    }))
}

async fn update_course(
    State(state): State<AppState>,
    Json(course): Json<CourseStatus>,
) -> Result<StatusCode, ApiError> {
    state.catalog.set_ready(course.ready).await?;
    Ok(StatusCode::NO_CONTENT)
}
