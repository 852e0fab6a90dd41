//! Agency levels, referral codes and single-level deposit commissions.

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::Transactional;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::{Amount, Bps};
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, timeline_key, trees, tx_get, tx_put, Store};
use crate::wallet::{self, Balance, TxType, Wallet, WalletTransaction};

/// Service fee on stars → coins conversion.
pub const STARS_TO_COINS_FEE: Bps = Bps::percent(8);

#[derive(Debug, Clone, Serialize)]
pub struct AgencyLevel {
    pub level: u8,
    pub name: &'static str,
    /// Percent of each referred deposit.
    pub commission_rate: u32,
    /// Referred volume needed this month.
    pub monthly_threshold: Amount,
}

impl AgencyLevel {
    pub fn rate(&self) -> Bps {
        Bps::percent(self.commission_rate)
    }
}

pub static AGENCY_LEVELS: [AgencyLevel; 4] = [
    AgencyLevel { level: 0, name: "Member", commission_rate: 0, monthly_threshold: Amount::ZERO },
    AgencyLevel { level: 1, name: "Sub-Agent Level 1", commission_rate: 12, monthly_threshold: Amount::from_major(500) },
    AgencyLevel { level: 2, name: "Sub-Agent Level 2", commission_rate: 16, monthly_threshold: Amount::from_major(1500) },
    AgencyLevel { level: 3, name: "Agency Level 20", commission_rate: 20, monthly_threshold: Amount::from_major(3000) },
];

pub fn agency_level(n: u8) -> &'static AgencyLevel {
    AGENCY_LEVELS.get(n as usize).unwrap_or(&AGENCY_LEVELS[0])
}

/// Highest level whose monthly threshold the volume reaches.
pub fn level_for_volume(volume: Amount) -> u8 {
    AGENCY_LEVELS
        .iter()
        .filter(|l| volume >= l.monthly_threshold)
        .map(|l| l.level)
        .max()
        .unwrap_or(0)
}

fn month_start(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive().with_day(1).unwrap_or_else(|| now.date_naive())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgencyStatus {
    pub user_id: String,
    pub agency_level: u8,
    pub referral_code: String,
    pub total_referrals: u32,
    pub active_referrals: u32,
    pub total_commission_earned: Amount,
    pub monthly_volume: Amount,
    pub monthly_volume_reset_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgencyStatus {
    fn new(user_id: &str, code: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            agency_level: 0,
            referral_code: code,
            total_referrals: 0,
            active_referrals: 0,
            total_commission_earned: Amount::ZERO,
            monthly_volume: Amount::ZERO,
            monthly_volume_reset_date: month_start(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add referred volume, resetting first if the month rolled over.
    /// Returns the commission owed at the resulting level.
    fn add_volume(&mut self, amount: Amount, now: DateTime<Utc>) -> Amount {
        let month = month_start(now);
        if self.monthly_volume_reset_date != month {
            self.monthly_volume = Amount::ZERO;
            self.monthly_volume_reset_date = month;
        }
        self.monthly_volume += amount;
        self.agency_level = level_for_volume(self.monthly_volume);
        let commission = amount.percent(agency_level(self.agency_level).rate());
        self.total_commission_earned += commission;
        self.updated_at = now;
        commission
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub referral_id: String,
    pub referrer_id: String,
    pub referred_id: String,
    pub status: ReferralStatus,
    pub total_transactions: Amount,
    pub commission_earned: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub commission_id: String,
    pub user_id: String,
    pub referred_id: String,
    pub source_transaction_id: String,
    pub deposit_amount: Amount,
    pub commission_rate: u32,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

fn new_referral_code() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("MN{}", hex[..8].to_uppercase())
}

/// Agency record for `user_id`, created with a fresh unique code on first use.
pub fn ensure_status(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<AgencyStatus> {
    if let Some(existing) = store.get::<AgencyStatus>(trees::AGENCY, user_id)? {
        return Ok(existing);
    }
    for _ in 0..5 {
        let code = new_referral_code();
        if !store.put_new(trees::REFERRAL_CODES, &code, &user_id)? {
            continue;
        }
        let status = AgencyStatus::new(user_id, code.clone(), now);
        if store.put_new(trees::AGENCY, user_id, &status)? {
            return Ok(status);
        }
        // lost a race with a concurrent first access
        store.remove(trees::REFERRAL_CODES, &code)?;
        return store
            .get(trees::AGENCY, user_id)?
            .ok_or(ApiError::NotFound("Agency status not found"));
    }
    Err(ApiError::Internal("could not allocate a referral code".into()))
}

pub fn apply_referral_code(store: &Store, user_id: &str, code: &str, now: DateTime<Utc>) -> ApiResult<Referral> {
    if store.contains(trees::REFERRALS, user_id)? {
        return Err(ApiError::bad_request("You already have a referrer"));
    }
    let code = code.trim().to_uppercase();
    let referrer_id: String = store
        .get(trees::REFERRAL_CODES, &code)?
        .ok_or(ApiError::NotFound("Invalid referral code"))?;
    if referrer_id == user_id {
        return Err(ApiError::bad_request("Cannot use your own referral code"));
    }

    let referral = Referral {
        referral_id: new_id("ref"),
        referrer_id: referrer_id.clone(),
        referred_id: user_id.to_string(),
        status: ReferralStatus::Active,
        total_transactions: Amount::ZERO,
        commission_earned: Amount::ZERO,
        created_at: now,
    };
    if !store.put_new(trees::REFERRALS, user_id, &referral)? {
        return Err(ApiError::bad_request("You already have a referrer"));
    }
    store.put(
        trees::REFERRALS_BY_REFERRER,
        timeline_key(&referrer_id, now, user_id),
        &referral.referred_id,
    )?;
    store.update(trees::AGENCY, &referrer_id, "Agency status not found", |a: &mut AgencyStatus| {
        a.total_referrals += 1;
        a.active_referrals += 1;
        a.updated_at = now;
        Ok(())
    })?;
    Ok(referral)
}

/// Newest referrals made by `referrer_id`.
pub fn referrals_of(store: &Store, referrer_id: &str, limit: usize) -> ApiResult<Vec<Referral>> {
    let ids: Vec<String> = store.latest(trees::REFERRALS_BY_REFERRER, referrer_id, limit)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(r) = store.get::<Referral>(trees::REFERRALS, &id)? {
            out.push(r);
        }
    }
    Ok(out)
}

/// Pay the referrer of `referred_id` their commission on a deposit.
/// `None` when the depositor has no referrer or the rate is zero.
pub fn accrue_commission(
    store: &Store,
    referred_id: &str,
    deposit: Amount,
    source_txn: &str,
    now: DateTime<Utc>,
) -> ApiResult<Option<Commission>> {
    let Some(referral) = store.get::<Referral>(trees::REFERRALS, referred_id)? else {
        return Ok(None);
    };
    let referrer = referral.referrer_id.as_str();

    let agencies = store.tree(trees::AGENCY)?;
    let wallets = store.tree(trees::WALLETS)?;
    let referrals = store.tree(trees::REFERRALS)?;
    let commissions = store.tree(trees::COMMISSIONS)?;
    let commission = (&agencies, &wallets, &referrals, &commissions)
        .transaction(|(at, wt, rt, ct)| {
            let Some(mut agency) = tx_get::<AgencyStatus>(at, referrer.as_bytes())? else {
                return Ok(None);
            };
            let owed = agency.add_volume(deposit, now);
            tx_put(at, referrer.as_bytes(), &agency)?;

            let mut r = tx_get::<Referral>(rt, referred_id.as_bytes())?.unwrap_or_else(|| referral.clone());
            r.total_transactions += deposit;
            r.commission_earned += owed;
            tx_put(rt, referred_id.as_bytes(), &r)?;

            if !owed.is_positive() {
                return Ok(None);
            }
            let Some(mut w) = tx_get::<Wallet>(wt, referrer.as_bytes())? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            w.credit(Balance::Coins, owed);
            w.updated_at = now;
            tx_put(wt, referrer.as_bytes(), &w)?;

            let c = Commission {
                commission_id: new_id("com"),
                user_id: referrer.to_string(),
                referred_id: referred_id.to_string(),
                source_transaction_id: source_txn.to_string(),
                deposit_amount: deposit,
                commission_rate: agency_level(agency.agency_level).commission_rate,
                amount: owed,
                created_at: now,
            };
            tx_put(ct, &timeline_key(referrer, now, &c.commission_id), &c)?;
            Ok(Some(c))
        })
        .map_err(flatten)?;

    let Some(c) = commission else {
        return Ok(None);
    };
    WalletTransaction::new(referrer, TxType::ReferralCommission, c.amount, now)
        .reference(&c.commission_id)
        .describe(format!("{}% commission on referred deposit of {deposit}", c.commission_rate))
        .save(store)?;
    notify(
        store,
        referrer,
        NotificationKind::Agency,
        "Commission Earned! 💸",
        &format!("You earned {} coins from a referral deposit.", c.amount),
        Some("/agency"),
        now,
    )?;
    info!(referrer = %referrer, referred = %referred_id, amount = %c.amount, "referral commission");
    Ok(Some(c))
}

// --- DTOs ---

#[derive(Debug, Deserialize)]
pub struct ApplyReferralReq {
    pub referral_code: String,
}

#[derive(Debug, Deserialize)]
pub struct ConvertStarsReq {
    pub stars_amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct CommissionQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

// --- Routes ---

/// GET /api/agency/status
pub async fn status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("agency");
    let agency = ensure_status(&state.store, &user.user_id, Utc::now())?;
    let referrals = referrals_of(&state.store, &user.user_id, 100)?;

    let mut body = serde_json::to_value(&agency)?;
    if let Value::Object(map) = &mut body {
        map.insert("level_info".into(), serde_json::to_value(agency_level(agency.agency_level))?);
        map.insert(
            "next_level_info".into(),
            serde_json::to_value(AGENCY_LEVELS.get(agency.agency_level as usize + 1))?,
        );
        map.insert("referrals".into(), serde_json::to_value(&referrals)?);
        map.insert("all_levels".into(), serde_json::to_value(&AGENCY_LEVELS)?);
    }
    Ok(Json(body))
}

/// POST /api/agency/apply-referral
pub async fn apply_referral(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<ApplyReferralReq>,
) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let referral = apply_referral_code(&state.store, &user.user_id, &req.referral_code, now)?;
    if let Err(e) = notify(
        &state.store,
        &referral.referrer_id,
        NotificationKind::Agency,
        "New Referral! 🎉",
        "A new user joined using your referral code!",
        Some("/agency"),
        now,
    ) {
        warn!(error = %e, "referral notification failed");
    }
    Ok(Json(json!({ "success": true, "message": "Referral code applied successfully" })))
}

/// POST /api/agency/convert-stars
pub async fn convert_stars(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<ConvertStarsReq>,
) -> ApiResult<Json<Value>> {
    wallet::require_positive(req.stars_amount)?;
    let stars = req.stars_amount;
    let fee = stars.percent(STARS_TO_COINS_FEE);
    let coins = stars - fee;

    let now = Utc::now();
    wallet::apply(&state.store, &user.user_id, now, |w| {
        w.debit(Balance::Stars, stars)?;
        w.credit(Balance::Coins, coins);
        Ok(())
    })?;
    let tx = WalletTransaction::new(&user.user_id, TxType::StarsConversion, coins, now)
        .describe(format!("Converted {stars} stars to {coins} coins (8% fee: {fee})"))
        .save(&state.store)?;

    Ok(Json(json!({
        "success": true,
        "stars_converted": stars,
        "fee_amount": fee,
        "fee_percent": STARS_TO_COINS_FEE.as_percent(),
        "coins_received": coins,
        "transaction_id": tx.transaction_id,
    })))
}

/// GET /api/agency/commissions
pub async fn commissions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<CommissionQuery>,
) -> ApiResult<Json<Value>> {
    let (items, total) = state.store.timeline_page::<Commission, _>(
        trees::COMMISSIONS,
        &user.user_id,
        0,
        q.limit.clamp(1, 100),
        |_| true,
    )?;
    Ok(Json(json!({ "commissions": items, "total": total })))
}
