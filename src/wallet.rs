//! Wallet balances and transaction history.
//!
//! Every balance check-and-mutate runs inside a single sled transaction on
//! the wallets tree, so two concurrent debits can never overdraw a balance.

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::Transactional;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::agency;
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::Amount;
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, timeline_key, trees, tx_get, tx_put, Store};
use crate::vip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Balance {
    Coins,
    Stars,
    Bonus,
    Withdrawable,
}

impl Balance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Balance::Coins => "coins",
            Balance::Stars => "stars",
            Balance::Bonus => "bonus",
            Balance::Withdrawable => "withdrawable",
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Balance {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches("_balance") {
            "coins" => Ok(Balance::Coins),
            "stars" => Ok(Balance::Stars),
            "bonus" => Ok(Balance::Bonus),
            "withdrawable" => Ok(Balance::Withdrawable),
            _ => Err(ApiError::bad_request("Invalid balance type")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub user_id: String,
    pub coins_balance: Amount,
    pub stars_balance: Amount,
    pub bonus_balance: Amount,
    pub withdrawable_balance: Amount,
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: &str, coins: Amount, bonus: Amount, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            coins_balance: coins,
            stars_balance: Amount::ZERO,
            bonus_balance: bonus,
            withdrawable_balance: Amount::ZERO,
            total_deposited: Amount::ZERO,
            total_withdrawn: Amount::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balance(&self, b: Balance) -> Amount {
        match b {
            Balance::Coins => self.coins_balance,
            Balance::Stars => self.stars_balance,
            Balance::Bonus => self.bonus_balance,
            Balance::Withdrawable => self.withdrawable_balance,
        }
    }

    fn balance_mut(&mut self, b: Balance) -> &mut Amount {
        match b {
            Balance::Coins => &mut self.coins_balance,
            Balance::Stars => &mut self.stars_balance,
            Balance::Bonus => &mut self.bonus_balance,
            Balance::Withdrawable => &mut self.withdrawable_balance,
        }
    }

    pub fn debit(&mut self, b: Balance, amount: Amount) -> ApiResult<()> {
        let slot = self.balance_mut(b);
        if *slot < amount {
            return Err(ApiError::bad_request(format!("Insufficient {b} balance")));
        }
        *slot -= amount;
        Ok(())
    }

    pub fn credit(&mut self, b: Balance, amount: Amount) {
        *self.balance_mut(b) += amount;
    }
}

pub fn load(store: &Store, user_id: &str) -> ApiResult<Wallet> {
    store
        .get(trees::WALLETS, user_id)?
        .ok_or(ApiError::NotFound("Wallet not found"))
}

/// Atomically mutate a wallet. `f` must be free of side effects.
pub fn apply<R, F>(store: &Store, user_id: &str, now: DateTime<Utc>, f: F) -> ApiResult<(Wallet, R)>
where
    F: Fn(&mut Wallet) -> ApiResult<R>,
{
    store.update(trees::WALLETS, user_id, "Wallet not found", |w: &mut Wallet| {
        let out = f(w)?;
        w.updated_at = now;
        Ok((w.clone(), out))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdrawal,
    VipSubscription,
    VipRenewal,
    Bonus,
    GameBet,
    GameWin,
    Transfer,
    ActivityReward,
    DailyReward,
    ReferralCommission,
    CharityContribution,
    StarsConversion,
    GiftSent,
    GiftReceived,
    MessagingReward,
    Donation,
    CoursePurchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub transaction_id: String,
    pub user_id: String,
    pub transaction_type: TxType,
    /// Signed: debits are negative.
    pub amount: Amount,
    pub currency_type: Balance,
    pub status: TxStatus,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// A completed coins transaction; adjust with the builder methods.
    pub fn new(user_id: &str, tx_type: TxType, amount: Amount, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: new_id("txn"),
            user_id: user_id.to_string(),
            transaction_type: tx_type,
            amount,
            currency_type: Balance::Coins,
            status: TxStatus::Completed,
            reference_id: None,
            description: None,
            created_at: now,
        }
    }

    pub fn currency(mut self, c: Balance) -> Self {
        self.currency_type = c;
        self
    }

    pub fn status(mut self, s: TxStatus) -> Self {
        self.status = s;
        self
    }

    pub fn reference(mut self, id: &str) -> Self {
        self.reference_id = Some(id.to_string());
        self
    }

    pub fn describe(mut self, d: impl Into<String>) -> Self {
        self.description = Some(d.into());
        self
    }

    pub fn save(self, store: &Store) -> ApiResult<Self> {
        store.put(
            trees::TRANSACTIONS,
            timeline_key(&self.user_id, self.created_at, &self.transaction_id),
            &self,
        )?;
        Ok(self)
    }
}

/// Credit a deposit and record its transaction atomically.
pub fn credit_deposit(
    store: &Store,
    user_id: &str,
    amount: Amount,
    now: DateTime<Utc>,
) -> ApiResult<(Wallet, WalletTransaction)> {
    let tx = WalletTransaction::new(user_id, TxType::Deposit, amount, now)
        .describe(format!("Deposit of {amount} coins"));
    let wallets = store.tree(trees::WALLETS)?;
    let history = store.tree(trees::TRANSACTIONS)?;
    let wkey = user_id.as_bytes();
    let hkey = timeline_key(user_id, now, &tx.transaction_id);
    let wallet = (&wallets, &history)
        .transaction(|(wt, ht)| {
            let Some(mut w) = tx_get::<Wallet>(wt, wkey)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            w.credit(Balance::Coins, amount);
            w.total_deposited += amount;
            w.updated_at = now;
            tx_put(wt, wkey, &w)?;
            tx_put(ht, &hkey, &tx)?;
            Ok(w)
        })
        .map_err(flatten)?;
    Ok((wallet, tx))
}

/// Transactions of one type created at or after `since`, newest first.
pub fn transactions_since(
    store: &Store,
    user_id: &str,
    tx_type: TxType,
    since: DateTime<Utc>,
) -> ApiResult<Vec<WalletTransaction>> {
    let (txs, _) = store.timeline_page::<WalletTransaction, _>(
        trees::TRANSACTIONS,
        user_id,
        0,
        usize::MAX,
        |t| t.transaction_type == tx_type && t.created_at >= since,
    )?;
    Ok(txs)
}

pub fn require_positive(amount: Amount) -> ApiResult<()> {
    if !amount.is_positive() {
        return Err(ApiError::bad_request("Amount must be positive"));
    }
    Ok(())
}

// --- DTOs ---

#[derive(Debug, Deserialize)]
pub struct TxQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub transaction_type: Option<TxType>,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct AmountReq {
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct TransferReq {
    pub amount: Amount,
    pub from_balance: String,
    pub to_balance: String,
}

// --- Routes ---

/// GET /api/wallet
pub async fn get_wallet(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Wallet>> {
    state.metrics.hit("wallet");
    Ok(Json(load(&state.store, &user.user_id)?))
}

/// GET /api/wallet/transactions
pub async fn transactions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<TxQuery>,
) -> ApiResult<Json<Value>> {
    let limit = q.limit.clamp(1, 100);
    let (txs, total) = state.store.timeline_page::<WalletTransaction, _>(
        trees::TRANSACTIONS,
        &user.user_id,
        q.offset,
        limit,
        |t| q.transaction_type.map_or(true, |ty| t.transaction_type == ty),
    )?;
    Ok(Json(json!({
        "transactions": txs,
        "total": total,
        "limit": limit,
        "offset": q.offset,
    })))
}

/// POST /api/wallet/deposit
///
/// Mock top-up: credits coins immediately, counts toward the VIP recharge
/// total and pays the referrer's commission.
pub async fn deposit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<AmountReq>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("wallet");
    require_positive(req.amount)?;
    let max = state.settings.max_deposit;
    if req.amount > max {
        return Err(ApiError::bad_request(format!("Maximum deposit is {max}")));
    }

    let now = Utc::now();
    let (wallet, tx) = credit_deposit(&state.store, &user.user_id, req.amount, now)?;
    state.metrics.deposits.inc();
    info!(user_id = %user.user_id, amount = %req.amount, "deposit credited");

    // the coins are committed; follow-ups only log on failure
    let eligible = match vip::add_recharge(&state.store, &user.user_id, req.amount, now) {
        Ok(s) => Some(vip::eligible_level(s.total_recharged)),
        Err(e) => {
            warn!(user_id = %user.user_id, error = %e, "recharge tracking failed");
            None
        }
    };
    let commission = agency::accrue_commission(&state.store, &user.user_id, req.amount, &tx.transaction_id, now)
        .unwrap_or_else(|e| {
            warn!(user_id = %user.user_id, error = %e, "referral commission failed");
            None
        });
    if let Err(e) = notify(
        &state.store,
        &user.user_id,
        NotificationKind::Wallet,
        "Deposit Successful! 💰",
        &format!("Your deposit of {} coins has been credited.", req.amount),
        Some("/wallet"),
        now,
    ) {
        warn!(user_id = %user.user_id, error = %e, "deposit notification failed");
    }

    Ok(Json(json!({
        "success": true,
        "wallet": wallet,
        "transaction_id": tx.transaction_id,
        "eligible_vip_level": eligible,
        "referral_commission": commission.map(|c| c.amount),
    })))
}

/// POST /api/wallet/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<AmountReq>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("wallet");
    require_positive(req.amount)?;

    let now = Utc::now();
    let (wallet, _) = apply(&state.store, &user.user_id, now, |w| {
        w.debit(Balance::Withdrawable, req.amount)?;
        w.total_withdrawn += req.amount;
        Ok(())
    })?;
    let tx = WalletTransaction::new(&user.user_id, TxType::Withdrawal, -req.amount, now)
        .status(TxStatus::Pending)
        .describe(format!("Withdrawal of {} coins", req.amount))
        .save(&state.store)?;

    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Wallet,
        "Withdrawal Requested 📤",
        &format!("Your withdrawal of {} coins is being processed.", req.amount),
        Some("/wallet"),
        now,
    )?;

    Ok(Json(json!({
        "success": true,
        "wallet": wallet,
        "transaction_id": tx.transaction_id,
    })))
}

/// POST /api/wallet/transfer
///
/// Moves value between the caller's own balances.
pub async fn transfer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<TransferReq>,
) -> ApiResult<Json<Value>> {
    let from: Balance = req.from_balance.parse()?;
    let to: Balance = req.to_balance.parse()?;
    if from == to {
        return Err(ApiError::bad_request("Cannot transfer to the same balance"));
    }
    require_positive(req.amount)?;

    let now = Utc::now();
    let (wallet, _) = apply(&state.store, &user.user_id, now, |w| {
        w.debit(from, req.amount)?;
        w.credit(to, req.amount);
        Ok(())
    })?;
    WalletTransaction::new(&user.user_id, TxType::Transfer, req.amount, now)
        .currency(from)
        .describe(format!("Moved {} from {from} to {to}", req.amount))
        .save(&state.store)?;

    Ok(Json(json!({ "success": true, "wallet": wallet })))
}
