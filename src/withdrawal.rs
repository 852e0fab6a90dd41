//! Stars withdrawals to saved bank or UPI payment methods.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::Amount;
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{new_id, owned_key, owner_prefix, trees, Store};
use crate::vip;
use crate::wallet::{self, Balance, TxStatus, TxType, WalletTransaction};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WithdrawalRules {
    pub min_stars_required: Amount,
    pub processing_time_days: i64,
    pub vip_processing_time_days: i64,
}

pub const RULES: WithdrawalRules = WithdrawalRules {
    min_stars_required: Amount::from_major(100_000),
    processing_time_days: 3,
    vip_processing_time_days: 1,
};

impl WithdrawalRules {
    pub fn processing_days(&self, priority: bool) -> i64 {
        if priority {
            self.vip_processing_time_days
        } else {
            self.processing_time_days
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodType {
    Bank,
    Upi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankDetails {
    pub account_holder_name: String,
    pub account_number: String,
    pub ifsc_code: String,
    pub bank_name: String,
}

impl BankDetails {
    fn is_complete(&self) -> bool {
        [&self.account_holder_name, &self.account_number, &self.ifsc_code, &self.bank_name]
            .iter()
            .all(|f| !f.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpiDetails {
    pub upi_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub method_id: String,
    pub user_id: String,
    pub method_type: MethodType,
    pub bank_details: Option<BankDetails>,
    pub upi_details: Option<UpiDetails>,
    pub is_default: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_id: String,
    pub user_id: String,
    pub amount: Amount,
    pub status: WithdrawalStatus,
    pub payment_method_id: String,
    pub payment_method_type: MethodType,
    pub bank_details: Option<BankDetails>,
    pub upi_details: Option<UpiDetails>,
    pub is_vip: bool,
    pub estimated_completion: DateTime<Utc>,
    pub face_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SaveMethodReq {
    pub method_type: MethodType,
    pub bank_details: Option<BankDetails>,
    pub upi_details: Option<UpiDetails>,
    #[serde(default)]
    pub is_default: bool,
}

pub fn save_method(store: &Store, user_id: &str, req: SaveMethodReq, now: DateTime<Utc>) -> ApiResult<PaymentMethod> {
    let (bank, upi) = match (req.method_type, req.bank_details, req.upi_details) {
        (MethodType::Bank, Some(b), _) if b.is_complete() => (Some(b), None),
        (MethodType::Upi, _, Some(u)) if u.upi_id.contains('@') => (None, Some(u)),
        _ => return Err(ApiError::bad_request("Invalid payment method details")),
    };

    if req.is_default {
        let tree = store.tree(trees::PAYMENT_METHODS)?;
        for item in tree.scan_prefix(owner_prefix(user_id)) {
            let (key, raw) = item?;
            let mut m: PaymentMethod = serde_json::from_slice(&raw)?;
            if m.is_default {
                m.is_default = false;
                tree.insert(key, serde_json::to_vec(&m)?)?;
            }
        }
    }

    let method = PaymentMethod {
        method_id: new_id("pm"),
        user_id: user_id.to_string(),
        method_type: req.method_type,
        bank_details: bank,
        upi_details: upi,
        is_default: req.is_default,
        is_verified: false,
        created_at: now,
    };
    store.put(trees::PAYMENT_METHODS, owned_key(user_id, &method.method_id), &method)?;
    Ok(method)
}

pub fn methods(store: &Store, user_id: &str) -> ApiResult<Vec<PaymentMethod>> {
    store.scan_prefix(trees::PAYMENT_METHODS, owner_prefix(user_id))
}

pub fn request(
    store: &Store,
    user_id: &str,
    amount: Amount,
    method_id: &str,
    now: DateTime<Utc>,
) -> ApiResult<Withdrawal> {
    let current = wallet::load(store, user_id)?;
    if current.stars_balance < RULES.min_stars_required {
        return Err(ApiError::bad_request(format!(
            "Minimum {} stars required for withdrawal",
            RULES.min_stars_required
        )));
    }
    wallet::require_positive(amount)?;
    let method: PaymentMethod = store
        .get(trees::PAYMENT_METHODS, owned_key(user_id, method_id))?
        .ok_or(ApiError::NotFound("Payment method not found"))?;
    let priority = vip::benefits_for(store, user_id, now)?.withdrawal_priority;

    wallet::apply(store, user_id, now, |w| w.debit(Balance::Stars, amount))?;

    let w = Withdrawal {
        withdrawal_id: new_id("wd"),
        user_id: user_id.to_string(),
        amount,
        status: WithdrawalStatus::Pending,
        payment_method_id: method.method_id,
        payment_method_type: method.method_type,
        bank_details: method.bank_details,
        upi_details: method.upi_details,
        is_vip: priority,
        estimated_completion: now + Duration::days(RULES.processing_days(priority)),
        face_verified: false,
        created_at: now,
        updated_at: now,
    };
    store.put(trees::WITHDRAWALS, owned_key(user_id, &w.withdrawal_id), &w)?;
    WalletTransaction::new(user_id, TxType::Withdrawal, -amount, now)
        .currency(Balance::Stars)
        .status(TxStatus::Pending)
        .reference(&w.withdrawal_id)
        .describe(format!("Withdrawal request of {amount} stars"))
        .save(store)?;
    Ok(w)
}

/// Mock face check: moves a pending withdrawal to processing.
pub fn verify_face(store: &Store, user_id: &str, withdrawal_id: &str, now: DateTime<Utc>) -> ApiResult<Withdrawal> {
    store.update(
        trees::WITHDRAWALS,
        owned_key(user_id, withdrawal_id),
        "Withdrawal not found",
        |w: &mut Withdrawal| {
            if w.status != WithdrawalStatus::Pending {
                return Err(ApiError::bad_request("Withdrawal cannot be verified"));
            }
            w.face_verified = true;
            w.status = WithdrawalStatus::Processing;
            w.updated_at = now;
            Ok(w.clone())
        },
    )
}

#[derive(Debug, Deserialize)]
pub struct WithdrawReq {
    pub amount: Amount,
    pub payment_method_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

// --- Routes ---

/// GET /api/withdrawal/config
pub async fn config(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let w = wallet::load(&state.store, &user.user_id)?;
    let priority = vip::benefits_for(&state.store, &user.user_id, now)?.withdrawal_priority;
    let needed = (RULES.min_stars_required - w.stars_balance).max(Amount::ZERO);
    Ok(Json(json!({
        "config": RULES,
        "current_stars": w.stars_balance,
        "is_eligible": w.stars_balance >= RULES.min_stars_required,
        "is_vip": priority,
        "processing_time_days": RULES.processing_days(priority),
        "saved_payment_methods": methods(&state.store, &user.user_id)?,
        "stars_needed": needed,
    })))
}

/// POST /api/withdrawal/save-payment-method
pub async fn save_payment_method(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<SaveMethodReq>,
) -> ApiResult<Json<Value>> {
    let m = save_method(&state.store, &user.user_id, req, Utc::now())?;
    Ok(Json(json!({ "success": true, "method_id": m.method_id })))
}

/// POST /api/withdrawal/request
pub async fn create_request(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<WithdrawReq>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("withdrawal");
    let now = Utc::now();
    let w = request(&state.store, &user.user_id, req.amount, &req.payment_method_id, now)?;
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Withdrawal,
        "Withdrawal Request Submitted 📤",
        &format!(
            "Your withdrawal of {} stars is being processed. Face verification required.",
            w.amount
        ),
        Some("/withdrawal"),
        now,
    )?;
    info!(user_id = %user.user_id, withdrawal_id = %w.withdrawal_id, amount = %w.amount, "withdrawal requested");
    Ok(Json(json!({
        "success": true,
        "withdrawal_id": w.withdrawal_id,
        "amount": w.amount,
        "status": w.status,
        "estimated_completion": w.estimated_completion,
        "requires_face_verification": true,
    })))
}

/// GET /api/withdrawal/history
pub async fn history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let mut all: Vec<Withdrawal> = state
        .store
        .scan_prefix(trees::WITHDRAWALS, owner_prefix(&user.user_id))?;
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    all.truncate(q.limit.clamp(1, 100));
    Ok(Json(json!({ "withdrawals": all })))
}

/// POST /api/withdrawal/:withdrawal_id/verify-face
pub async fn verify_face_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(withdrawal_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    verify_face(&state.store, &user.user_id, &withdrawal_id, now)?;
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Withdrawal,
        "Face Verification Complete ✅",
        "Your withdrawal is now being processed.",
        Some("/withdrawal"),
        now,
    )?;
    Ok(Json(json!({
        "success": true,
        "message": "Face verification completed, withdrawal is now processing",
    })))
}
