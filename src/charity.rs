//! Global charity wallet and per-user contribution records.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use std::collections::HashMap;

use crate::auth::{find_user, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::money::{Amount, Bps};
use crate::state::AppState;
use crate::store::{flatten, new_id, timeline_key, trees, tx_get, tx_put, Store, GLOBAL_KEY};

/// Share of every gift's value routed to the charity wallet.
pub const GIFT_CHARITY: Bps = Bps::percent(2);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharityWallet {
    pub total_balance: Amount,
    pub total_received: Amount,
    pub total_distributed: Amount,
    pub lives_helped: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CharityWallet {
    fn empty() -> Self {
        Self {
            total_balance: Amount::ZERO,
            total_received: Amount::ZERO,
            total_distributed: Amount::ZERO,
            lives_helped: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionSource {
    Gift,
    Donation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub contribution_id: String,
    pub user_id: String,
    pub amount: Amount,
    pub source: ContributionSource,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl Contribution {
    pub fn new(user_id: &str, amount: Amount, source: ContributionSource, reference_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            contribution_id: new_id("char"),
            user_id: user_id.to_string(),
            amount,
            source,
            reference_id: reference_id.to_string(),
            created_at: now,
        }
    }
}

/// Credit the charity wallet and store the contribution, inside a caller's
/// transaction over the charity and contribution trees.
pub fn credit_tx(
    charity: &TransactionalTree,
    contributions: &TransactionalTree,
    c: &Contribution,
) -> ConflictableTransactionResult<(), ApiError> {
    let mut wallet = tx_get::<CharityWallet>(charity, GLOBAL_KEY)?.unwrap_or_else(CharityWallet::empty);
    wallet.total_balance += c.amount;
    wallet.total_received += c.amount;
    wallet.updated_at = Some(c.created_at);
    tx_put(charity, GLOBAL_KEY, &wallet)?;
    tx_put(
        contributions,
        &timeline_key(&c.user_id, c.created_at, &c.contribution_id),
        c,
    )
}

pub fn contribute(store: &Store, c: &Contribution) -> ApiResult<()> {
    let charity = store.tree(trees::CHARITY)?;
    let contributions = store.tree(trees::CHARITY_CONTRIBUTIONS)?;
    (&charity, &contributions)
        .transaction(|(ct, kt)| credit_tx(ct, kt, c))
        .map_err(flatten)
}

pub fn wallet(store: &Store) -> ApiResult<CharityWallet> {
    Ok(store
        .get(trees::CHARITY, GLOBAL_KEY)?
        .unwrap_or_else(CharityWallet::empty))
}

/// Users ranked by total contributed, highest first.
pub fn top_contributors(store: &Store, n: usize) -> ApiResult<Vec<(String, Amount)>> {
    let mut totals: HashMap<String, Amount> = HashMap::new();
    for c in store.values::<Contribution>(trees::CHARITY_CONTRIBUTIONS)? {
        *totals.entry(c.user_id).or_default() += c.amount;
    }
    let mut ranked: Vec<_> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    Ok(ranked)
}

// --- Routes ---

/// GET /api/charity/stats
pub async fn stats(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("charity");
    let global = wallet(&state.store)?;
    let (recent, _) = state.store.timeline_page::<Contribution, _>(
        trees::CHARITY_CONTRIBUTIONS,
        &user.user_id,
        0,
        10,
        |_| true,
    )?;
    let mine: Amount = state
        .store
        .scan_prefix::<Contribution>(trees::CHARITY_CONTRIBUTIONS, crate::store::owner_prefix(&user.user_id))?
        .iter()
        .map(|c| c.amount)
        .sum();
    Ok(Json(json!({
        "global_stats": global,
        "user_contributions": recent,
        "total_user_contribution": mine,
        "config": { "vip_gift_charity_percent": GIFT_CHARITY.as_percent() },
    })))
}

/// GET /api/charity/leaderboard
pub async fn leaderboard(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut board = Vec::new();
    for (user_id, total) in top_contributors(&state.store, 20)? {
        let Some(user) = find_user(&state, &user_id)? else {
            continue;
        };
        board.push(json!({
            "rank": board.len() + 1,
            "user": { "user_id": user.user_id, "name": user.name, "picture": user.picture },
            "total_donated": total,
        }));
    }
    Ok(Json(json!({ "leaderboard": board })))
}
