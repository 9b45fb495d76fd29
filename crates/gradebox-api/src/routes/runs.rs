//! Run cache endpoints.

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use url::form_urlencoded;

use crate::AppState;
use crate::error::ApiError;
use gradebox_core::Run;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_runs).put(create_runs))
}

/// `hash` may repeat; `baseline` filters on the baseline flag.
#[derive(Debug, Default, PartialEq)]
struct RunQuery {
    hashes: Vec<String>,
    baseline: Option<bool>,
}

fn parse_query(query: Option<&str>) -> Result<RunQuery, ApiError> {
    let mut parsed = RunQuery::default();
    let Some(query) = query else {
        return Ok(parsed);
    };
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "hash" => parsed.hashes.push(value.into_owned()),
            "baseline" if !value.is_empty() => {
                parsed.baseline = Some(parse_bool(&value).ok_or_else(|| {
                    ApiError::BadRequest("`baseline` has to be true or false".to_string())
                })?);
            }
            _ => {}
        }
    }
    Ok(parsed)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

async fn list_runs(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Run>>, ApiError> {
    let query = parse_query(query.as_deref())?;
    if query.hashes.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let mut runs: Vec<Run> = state
        .runs
        .get_runs(&query.hashes)
        .await?
        .into_values()
        .filter(|run| query.baseline.is_none_or(|b| run.baseline == b))
        .collect();
    runs.sort_by(|a, b| a.hash.cmp(&b.hash));
    Ok(Json(runs))
}

/// Store runs; hashes that already exist are left untouched.
async fn create_runs(
    State(state): State<AppState>,
    Json(runs): Json<Vec<Run>>,
) -> Result<StatusCode, ApiError> {
    if runs.iter().any(|r| r.hash.is_empty()) {
        return Err(ApiError::BadRequest("run hash cannot be empty".to_string()));
    }
    state.runs.submit_runs(&runs).await?;
    Ok(StatusCode::NO_CONTENT)
}
