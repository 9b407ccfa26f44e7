use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::db::models::Notification;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", get(list).delete(clear))
}

/// GET /api/notifications
/// Listing marks the caller's notifications as read.
async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<Notification>>> {
    Ok(Json(state.notifications.list_for_user(&user.id)?))
}

/// DELETE /api/notifications
async fn clear(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Value>> {
    let removed = state.notifications.delete_all_for_user(&user.id)?;
    tracing::info!("Deleted {} notifications for {}", removed, user.username);
    Ok(Json(json!({ "message": "Notifications deleted successfully" })))
}
