use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Muqaddas Network API", "status": "running" }))
}

/// GET /api/health
///
/// Touches the store so a wedged database shows up as a 500.
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let users = state.store.len(crate::store::trees::USERS)?;
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "users": users,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
