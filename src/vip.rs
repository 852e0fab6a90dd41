//! VIP tiers: level table, eligibility and monthly subscriptions.

use axum::{
    extract::State,
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use tracing::{info, warn};

use crate::auth::{AdminAuth, CurrentUser};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::Amount;
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, trees, tx_get, tx_put, Store};
use crate::wallet::{Balance, TxType, Wallet, WalletTransaction};

pub const SUBSCRIPTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct VipLevel {
    pub level: u8,
    pub name: &'static str,
    pub recharge_requirement: Amount,
    pub monthly_fee: Amount,
    /// Percent shown on the VIP card. Informational only.
    pub charity_bonus: u32,
    pub free_spins_daily: u32,
    /// Percent off course prices.
    pub education_discount: u32,
    pub priority_support: bool,
    pub withdrawal_priority: bool,
    pub exclusive_games: bool,
    pub badge_color: &'static str,
    pub icon: &'static str,
}

macro_rules! vip_level {
    ($level:expr, $name:expr, $req:expr, $fee:expr, $charity:expr, $spins:expr, $edu:expr,
     $support:expr, $withdraw:expr, $games:expr, $color:expr, $icon:expr) => {
        VipLevel {
            level: $level,
            name: $name,
            recharge_requirement: Amount::from_major($req),
            monthly_fee: Amount::from_major($fee),
            charity_bonus: $charity,
            free_spins_daily: $spins,
            education_discount: $edu,
            priority_support: $support,
            withdrawal_priority: $withdraw,
            exclusive_games: $games,
            badge_color: $color,
            icon: $icon,
        }
    };
}

pub static LEVELS: [VipLevel; 6] = [
    vip_level!(0, "Basic", 0, 0, 0, 0, 0, false, false, false, "#808080", "user"),
    vip_level!(1, "Bronze", 500, 99, 5, 2, 5, false, false, false, "#CD7F32", "star"),
    vip_level!(2, "Silver", 2000, 299, 10, 5, 10, true, false, false, "#C0C0C0", "star"),
    vip_level!(3, "Gold", 5000, 599, 15, 10, 15, true, true, true, "#FFD700", "crown"),
    vip_level!(4, "Platinum", 15000, 999, 20, 20, 20, true, true, true, "#E5E4E2", "crown"),
    vip_level!(5, "Diamond", 50000, 1999, 30, 50, 30, true, true, true, "#B9F2FF", "diamond"),
];

pub fn level(n: u8) -> Option<&'static VipLevel> {
    LEVELS.iter().find(|l| l.level == n)
}

/// Highest level whose recharge requirement is covered by `total_recharged`.
pub fn eligible_level(total_recharged: Amount) -> u8 {
    LEVELS
        .iter()
        .filter(|l| total_recharged >= l.recharge_requirement)
        .map(|l| l.level)
        .max()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserVipStatus {
    pub user_id: String,
    pub vip_level: u8,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub total_recharged: Amount,
    pub is_active: bool,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserVipStatus {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            vip_level: 0,
            subscription_start: None,
            subscription_end: None,
            total_recharged: Amount::ZERO,
            is_active: false,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Benefits currently in force. Lapsed or never-started subscriptions
    /// fall back to Basic.
    pub fn benefits(&self, now: DateTime<Utc>) -> &'static VipLevel {
        let live = self.is_active && self.subscription_end.is_some_and(|end| end > now);
        if live {
            level(self.vip_level).unwrap_or(&LEVELS[0])
        } else {
            &LEVELS[0]
        }
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.subscription_end.map(|end| (end - now).num_days().max(0))
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.subscription_end.is_some_and(|end| end <= now)
    }

    fn start_period(&mut self, level: u8, now: DateTime<Utc>) {
        self.vip_level = level;
        self.subscription_start = Some(now);
        self.subscription_end = Some(now + Duration::days(SUBSCRIPTION_DAYS));
        self.is_active = true;
        self.updated_at = now;
    }
}

pub fn load_status(store: &Store, user_id: &str) -> ApiResult<UserVipStatus> {
    store
        .get(trees::VIP_STATUS, user_id)?
        .ok_or(ApiError::NotFound("VIP status not found"))
}

/// Benefits of the caller's live subscription, Basic when there is none.
pub fn benefits_for(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<&'static VipLevel> {
    let status: Option<UserVipStatus> = store.get(trees::VIP_STATUS, user_id)?;
    Ok(status.map_or(&LEVELS[0], |s| s.benefits(now)))
}

pub fn add_recharge(store: &Store, user_id: &str, amount: Amount, now: DateTime<Utc>) -> ApiResult<UserVipStatus> {
    store.upsert(
        trees::VIP_STATUS,
        user_id,
        || UserVipStatus::new(user_id, now),
        |s: &mut UserVipStatus| {
            s.total_recharged += amount;
            s.updated_at = now;
            Ok(s.clone())
        },
    )
}

/// Debit the monthly fee and start a 30-day period in one transaction.
pub fn subscribe_user(store: &Store, user_id: &str, lvl: &VipLevel, now: DateTime<Utc>) -> ApiResult<UserVipStatus> {
    let wallets = store.tree(trees::WALLETS)?;
    let statuses = store.tree(trees::VIP_STATUS)?;
    let key = user_id.as_bytes();
    (&wallets, &statuses)
        .transaction(|(wt, vt)| {
            let Some(mut status) = tx_get::<UserVipStatus>(vt, key)? else {
                return abort(ApiError::NotFound("VIP status not found"));
            };
            if status.total_recharged < lvl.recharge_requirement {
                return abort(ApiError::bad_request(format!(
                    "Need to recharge {} to unlock this level",
                    lvl.recharge_requirement
                )));
            }
            let Some(mut wallet) = tx_get::<Wallet>(wt, key)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            wallet
                .debit(Balance::Coins, lvl.monthly_fee)
                .map_err(ConflictableTransactionError::Abort)?;
            wallet.updated_at = now;
            status.start_period(lvl.level, now);
            tx_put(wt, key, &wallet)?;
            tx_put(vt, key, &status)?;
            Ok(status)
        })
        .map_err(flatten)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Renewed(Amount),
    Expired,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub renewed: usize,
    pub expired: usize,
}

fn settle(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<Option<(Settled, UserVipStatus)>> {
    let wallets = store.tree(trees::WALLETS)?;
    let statuses = store.tree(trees::VIP_STATUS)?;
    let key = user_id.as_bytes();
    (&wallets, &statuses)
        .transaction(|(wt, vt)| {
            let Some(mut status) = tx_get::<UserVipStatus>(vt, key)? else {
                return Ok(None);
            };
            if !status.is_due(now) {
                return Ok(None);
            }
            let fee = level(status.vip_level).map_or(Amount::ZERO, |l| l.monthly_fee);
            if status.auto_renew {
                if let Some(mut wallet) = tx_get::<Wallet>(wt, key)? {
                    if wallet.debit(Balance::Coins, fee).is_ok() {
                        wallet.updated_at = now;
                        status.start_period(status.vip_level, now);
                        tx_put(wt, key, &wallet)?;
                        tx_put(vt, key, &status)?;
                        return Ok(Some((Settled::Renewed(fee), status)));
                    }
                }
            }
            status.is_active = false;
            status.updated_at = now;
            tx_put(vt, key, &status)?;
            Ok(Some((Settled::Expired, status)))
        })
        .map_err(flatten)
}

/// Renew or deactivate every subscription whose period has ended.
pub fn sweep_expired(state: &AppState, now: DateTime<Utc>) -> ApiResult<SweepReport> {
    let mut report = SweepReport::default();
    let due: Vec<UserVipStatus> = state.store.values(trees::VIP_STATUS)?;
    for candidate in due.into_iter().filter(|s| s.is_due(now)) {
        let Some((outcome, status)) = settle(&state.store, &candidate.user_id, now)? else {
            continue;
        };
        let name = level(status.vip_level).map_or("Basic", |l| l.name);
        match outcome {
            Settled::Renewed(fee) => {
                WalletTransaction::new(&status.user_id, TxType::VipRenewal, -fee, now)
                    .describe(format!("VIP {name} renewal"))
                    .save(&state.store)?;
                notify(
                    &state.store,
                    &status.user_id,
                    NotificationKind::Vip,
                    &format!("VIP {name} Renewed 👑"),
                    &format!("{fee} coins were charged for another {SUBSCRIPTION_DAYS} days."),
                    Some("/vip"),
                    now,
                )?;
                state.metrics.vip_renewals.inc();
                report.renewed += 1;
            }
            Settled::Expired => {
                notify(
                    &state.store,
                    &status.user_id,
                    NotificationKind::Vip,
                    &format!("VIP {name} Expired"),
                    "Your VIP subscription has ended. Subscribe again to restore your benefits.",
                    Some("/vip"),
                    now,
                )?;
                report.expired += 1;
            }
        }
    }
    if report.renewed + report.expired > 0 {
        info!(renewed = report.renewed, expired = report.expired, "vip sweep");
    }
    Ok(report)
}

/// Background loop driving [`sweep_expired`].
pub async fn run_sweeper(state: AppState) {
    let mut tick = tokio::time::interval(state.settings.sweep_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let st = state.clone();
        let res = tokio::task::spawn_blocking(move || sweep_expired(&st, Utc::now())).await;
        match res {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "vip sweep failed"),
            Err(e) => warn!(error = %e, "vip sweep task panicked"),
        }
    }
}

// --- DTOs ---

#[derive(Debug, Deserialize)]
pub struct SubscribeReq {
    pub level: i64,
}

#[derive(Serialize)]
struct StatusView {
    #[serde(flatten)]
    status: UserVipStatus,
    current_level_data: &'static VipLevel,
    eligible_level: u8,
    days_remaining: Option<i64>,
}

// --- Routes ---

/// GET /api/vip/levels
pub async fn levels() -> Json<Value> {
    Json(json!({ "levels": LEVELS }))
}

/// GET /api/vip/status
pub async fn status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("vip");
    let now = Utc::now();
    let status = load_status(&state.store, &user.user_id)?;
    let view = StatusView {
        current_level_data: level(status.vip_level).unwrap_or(&LEVELS[0]),
        eligible_level: eligible_level(status.total_recharged),
        days_remaining: status.days_remaining(now),
        status,
    };
    Ok(Json(serde_json::to_value(view)?))
}

/// POST /api/vip/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<SubscribeReq>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("vip");
    let lvl = u8::try_from(req.level)
        .ok()
        .and_then(level)
        .ok_or_else(|| ApiError::bad_request("Invalid VIP level"))?;

    let now = Utc::now();
    let status = subscribe_user(&state.store, &user.user_id, lvl, now)?;
    let tx = WalletTransaction::new(&user.user_id, TxType::VipSubscription, -lvl.monthly_fee, now)
        .describe(format!("VIP {} subscription", lvl.name))
        .save(&state.store)?;
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Vip,
        &format!("VIP {} Activated! 👑", lvl.name),
        "Enjoy your exclusive benefits for the next 30 days!",
        Some("/vip"),
        now,
    )?;
    info!(user_id = %user.user_id, level = lvl.level, "vip subscribed");

    Ok(Json(json!({
        "success": true,
        "vip_status": status,
        "level_data": lvl,
        "transaction_id": tx.transaction_id,
    })))
}

/// POST /api/vip/toggle-auto-renew
pub async fn toggle_auto_renew(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let auto_renew = state.store.update(
        trees::VIP_STATUS,
        &user.user_id,
        "VIP status not found",
        |s: &mut UserVipStatus| {
            s.auto_renew = !s.auto_renew;
            s.updated_at = now;
            Ok(s.auto_renew)
        },
    )?;
    Ok(Json(json!({ "success": true, "auto_renew": auto_renew })))
}

/// POST /api/vip/cancel
///
/// Stops renewal; benefits stay until the current period ends.
pub async fn cancel(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    state.store.update(
        trees::VIP_STATUS,
        &user.user_id,
        "VIP status not found",
        |s: &mut UserVipStatus| {
            s.auto_renew = false;
            s.updated_at = now;
            Ok(())
        },
    )?;
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Vip,
        "VIP Subscription Cancelled",
        "Your VIP benefits will remain active until the subscription period ends.",
        Some("/vip"),
        now,
    )?;
    Ok(Json(json!({
        "success": true,
        "message": "VIP subscription cancelled. Benefits remain active until expiry.",
    })))
}

/// POST /api/admin/vip/sweep
pub async fn sweep_now(State(state): State<AppState>, _admin: AdminAuth) -> ApiResult<Json<SweepReport>> {
    Ok(Json(sweep_expired(&state, Utc::now())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_follows_thresholds() {
        assert_eq!(eligible_level(Amount::ZERO), 0);
        assert_eq!(eligible_level(Amount::from_cents(49_999)), 0);
        assert_eq!(eligible_level(Amount::from_major(500)), 1);
        assert_eq!(eligible_level(Amount::from_major(4_999)), 2);
        assert_eq!(eligible_level(Amount::from_major(15_000)), 4);
        assert_eq!(eligible_level(Amount::from_major(1_000_000)), 5);
    }

    #[test]
    fn table_is_ordered_by_requirement() {
        for pair in LEVELS.windows(2) {
            assert!(pair[0].recharge_requirement < pair[1].recharge_requirement);
            assert_eq!(pair[0].level + 1, pair[1].level);
        }
    }

    #[test]
    fn lapsed_subscription_has_basic_benefits() {
        let now = Utc::now();
        let mut s = UserVipStatus::new("u", now);
        s.start_period(3, now - Duration::days(31));
        assert_eq!(s.benefits(now).level, 0);
        assert_eq!(s.days_remaining(now), Some(0));

        s.start_period(3, now);
        assert_eq!(s.benefits(now).level, 3);
        assert_eq!(s.days_remaining(now + Duration::hours(1)), Some(29));
    }

    fn seed(store: &Store, coins: i64, recharged: i64, now: DateTime<Utc>) {
        store
            .put(trees::WALLETS, "u", &Wallet::new("u", Amount::from_major(coins), Amount::ZERO, now))
            .unwrap();
        let mut s = UserVipStatus::new("u", now);
        s.total_recharged = Amount::from_major(recharged);
        store.put(trees::VIP_STATUS, "u", &s).unwrap();
    }

    #[test]
    fn subscribe_checks_requirement_then_coins() {
        let store = Store::temporary().unwrap();
        let now = Utc::now();
        seed(&store, 50, 400, now);

        let err = subscribe_user(&store, "u", &LEVELS[1], now).unwrap_err();
        assert_eq!(err.to_string(), "Need to recharge 500 to unlock this level");

        add_recharge(&store, "u", Amount::from_major(100), now).unwrap();
        let err = subscribe_user(&store, "u", &LEVELS[1], now).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient coins balance");

        crate::wallet::apply(&store, "u", now, |w| {
            w.credit(Balance::Coins, Amount::from_major(100));
            Ok(())
        })
        .unwrap();
        let s = subscribe_user(&store, "u", &LEVELS[1], now).unwrap();
        assert!(s.is_active);
        assert_eq!(s.vip_level, 1);
        assert_eq!(crate::wallet::load(&store, "u").unwrap().coins_balance, Amount::from_major(51));
    }

    #[test]
    fn settle_renews_when_funded_and_expires_otherwise() {
        let store = Store::temporary().unwrap();
        let start = Utc::now() - Duration::days(31);
        let now = Utc::now();
        seed(&store, 200, 500, start);
        subscribe_user(&store, "u", &LEVELS[1], start).unwrap();

        let (outcome, s) = settle(&store, "u", now).unwrap().unwrap();
        assert_eq!(outcome, Settled::Renewed(Amount::from_major(99)));
        assert!(s.is_active);
        assert!(settle(&store, "u", now).unwrap().is_none());

        let later = now + Duration::days(31);
        let (outcome, s) = settle(&store, "u", later).unwrap().unwrap();
        assert_eq!(outcome, Settled::Expired);
        assert!(!s.is_active);
        assert_eq!(crate::wallet::load(&store, "u").unwrap().coins_balance, Amount::from_major(2));
    }
}
