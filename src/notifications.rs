//! Per-user notifications
//!
//! Stored on the owner's timeline so listings come back newest first.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::state::AppState;
use crate::store::{new_id, owner_prefix, timeline_key, trees, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    Wallet,
    Vip,
    Reward,
    Agency,
    Withdrawal,
    Gift,
    Donation,
    Education,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationKind,
    pub is_read: bool,
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn notify(
    store: &Store,
    user_id: &str,
    kind: NotificationKind,
    title: &str,
    message: &str,
    action_url: Option<&str>,
    now: DateTime<Utc>,
) -> ApiResult<Notification> {
    let n = Notification {
        notification_id: new_id("notif"),
        user_id: user_id.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        notification_type: kind,
        is_read: false,
        action_url: action_url.map(str::to_string),
        created_at: now,
    };
    store.put(
        trees::NOTIFICATIONS,
        timeline_key(user_id, now, &n.notification_id),
        &n,
    )?;
    Ok(n)
}

pub fn unread_count(store: &Store, user_id: &str) -> ApiResult<usize> {
    let all: Vec<Notification> = store.scan_prefix(trees::NOTIFICATIONS, owner_prefix(user_id))?;
    Ok(all.iter().filter(|n| !n.is_read).count())
}

/// Mark matching notifications read. Returns how many changed.
fn mark_read(store: &Store, user_id: &str, only: Option<&str>) -> ApiResult<usize> {
    let tree = store.tree(trees::NOTIFICATIONS)?;
    let mut changed = 0;
    for item in tree.scan_prefix(owner_prefix(user_id)) {
        let (key, raw) = item?;
        let mut n: Notification = serde_json::from_slice(&raw)?;
        if n.is_read || only.is_some_and(|id| id != n.notification_id) {
            continue;
        }
        n.is_read = true;
        tree.insert(key, serde_json::to_vec(&n)?)?;
        changed += 1;
        if only.is_some() {
            break;
        }
    }
    Ok(changed)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub unread_only: bool,
}

fn default_limit() -> usize {
    20
}

// --- Routes ---

/// GET /api/notifications
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = q.limit.clamp(1, 100);
    let (notifications, _) = state.store.timeline_page::<Notification, _>(
        trees::NOTIFICATIONS,
        &user.user_id,
        0,
        limit,
        |n| !q.unread_only || !n.is_read,
    )?;
    let unread = unread_count(&state.store, &user.user_id)?;
    Ok(Json(json!({
        "notifications": notifications,
        "unread_count": unread,
    })))
}

/// POST /api/notifications/:notification_id/read
pub async fn read_one(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(notification_id): Path<String>,
) -> ApiResult<Json<Value>> {
    mark_read(&state.store, &user.user_id, Some(&notification_id))?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/notifications/read-all
pub async fn read_all(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let n = mark_read(&state.store, &user.user_id, None)?;
    Ok(Json(json!({ "success": true, "updated": n })))
}
