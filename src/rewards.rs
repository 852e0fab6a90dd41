//! Activity and messaging rewards, both capped per UTC day.

use axum::{extract::State, Json};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::Transactional;
use std::collections::HashSet;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::money::Amount;
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, owned_key, owner_prefix, trees, tx_get, tx_put, Store};
use crate::wallet::{Balance, TxType, Wallet, WalletTransaction};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActivityRules {
    pub minutes_required: u32,
    pub coins_reward: Amount,
    pub max_daily_rewards: u32,
    pub daily_bonus_coins: Amount,
}

pub const ACTIVITY: ActivityRules = ActivityRules {
    minutes_required: 15,
    coins_reward: Amount::from_major(200),
    max_daily_rewards: 6,
    daily_bonus_coins: Amount::from_major(50),
};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MessagingRules {
    pub chat_reward: Amount,
    pub max_daily_chat_rewards: u32,
}

pub const MESSAGING: MessagingRules = MessagingRules {
    chat_reward: Amount::from_major(20),
    max_daily_chat_rewards: 50,
};

fn day_key(user_id: &str, day: NaiveDate) -> Vec<u8> {
    owned_key(user_id, &day.format("%Y-%m-%d").to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivitySession {
    pub session_id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub total_active_minutes: u32,
    pub rewards_claimed: u32,
}

impl ActivitySession {
    fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: new_id("activity"),
            user_id: user_id.to_string(),
            date: now.date_naive(),
            started_at: now,
            last_active_at: now,
            total_active_minutes: 0,
            rewards_claimed: 0,
        }
    }

    pub fn rewards_available(&self) -> u32 {
        rewards_available(self.total_active_minutes, self.rewards_claimed)
    }
}

pub fn rewards_available(minutes: u32, claimed: u32) -> u32 {
    let earned = (minutes / ACTIVITY.minutes_required).saturating_sub(claimed);
    let room = ACTIVITY.max_daily_rewards.saturating_sub(claimed);
    earned.min(room)
}

/// Consecutive days with at least one claim, ending today or, while today
/// has no claim yet, yesterday. Older runs count as no streak.
pub fn streak(sessions: &[ActivitySession], today: NaiveDate) -> u32 {
    let claimed: HashSet<NaiveDate> = sessions
        .iter()
        .filter(|s| s.rewards_claimed > 0)
        .map(|s| s.date)
        .collect();
    let mut day = if claimed.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };
    let mut n = 0;
    while let Some(d) = day.filter(|d| claimed.contains(d)) {
        n += 1;
        day = d.pred_opt();
    }
    n
}

pub fn today_session(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<ActivitySession> {
    Ok(store
        .get(trees::ACTIVITY, day_key(user_id, now.date_naive()))?
        .unwrap_or_else(|| ActivitySession::new(user_id, now)))
}

pub fn track(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<ActivitySession> {
    store.upsert(
        trees::ACTIVITY,
        day_key(user_id, now.date_naive()),
        || ActivitySession::new(user_id, now),
        |s: &mut ActivitySession| {
            s.total_active_minutes += 1;
            s.last_active_at = now;
            Ok(s.clone())
        },
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct Claimed {
    pub reward: Amount,
    pub first_of_day: bool,
    pub rewards_claimed: u32,
    pub coins_balance: Amount,
}

/// Consume one available activity reward and credit coins atomically.
pub fn claim(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<Claimed> {
    let sessions = store.tree(trees::ACTIVITY)?;
    let wallets = store.tree(trees::WALLETS)?;
    let skey = day_key(user_id, now.date_naive());
    let wkey = user_id.as_bytes();
    (&sessions, &wallets)
        .transaction(|(st, wt)| {
            let Some(mut session) = tx_get::<ActivitySession>(st, &skey)? else {
                return abort(ApiError::bad_request("No activity recorded today"));
            };
            if session.rewards_claimed >= ACTIVITY.max_daily_rewards {
                return abort(ApiError::bad_request("Daily reward limit reached"));
            }
            if session.rewards_available() == 0 {
                return abort(ApiError::bad_request("No rewards available to claim"));
            }
            let Some(mut wallet) = tx_get::<Wallet>(wt, wkey)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            let first_of_day = session.rewards_claimed == 0;
            let reward = if first_of_day {
                ACTIVITY.coins_reward + ACTIVITY.daily_bonus_coins
            } else {
                ACTIVITY.coins_reward
            };
            session.rewards_claimed += 1;
            wallet.credit(Balance::Coins, reward);
            wallet.updated_at = now;
            tx_put(st, &skey, &session)?;
            tx_put(wt, wkey, &wallet)?;
            Ok(Claimed {
                reward,
                first_of_day,
                rewards_claimed: session.rewards_claimed,
                coins_balance: wallet.coins_balance,
            })
        })
        .map_err(flatten)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagingDay {
    pub user_id: String,
    pub date: NaiveDate,
    pub rewards_claimed: u32,
    pub updated_at: DateTime<Utc>,
}

pub fn messaging_today(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<u32> {
    let day: Option<MessagingDay> = store.get(trees::MESSAGING_REWARDS, day_key(user_id, now.date_naive()))?;
    Ok(day.map_or(0, |d| d.rewards_claimed))
}

/// Credit one chat reward unless today's cap is reached. Returns the new count.
pub fn claim_messaging(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<u32> {
    let days = store.tree(trees::MESSAGING_REWARDS)?;
    let wallets = store.tree(trees::WALLETS)?;
    let dkey = day_key(user_id, now.date_naive());
    let wkey = user_id.as_bytes();
    (&days, &wallets)
        .transaction(|(dt, wt)| {
            let mut day = tx_get::<MessagingDay>(dt, &dkey)?.unwrap_or_else(|| MessagingDay {
                user_id: user_id.to_string(),
                date: now.date_naive(),
                rewards_claimed: 0,
                updated_at: now,
            });
            if day.rewards_claimed >= MESSAGING.max_daily_chat_rewards {
                return abort(ApiError::bad_request(format!(
                    "Daily limit of {} chat rewards reached",
                    MESSAGING.max_daily_chat_rewards
                )));
            }
            let Some(mut wallet) = tx_get::<Wallet>(wt, wkey)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            day.rewards_claimed += 1;
            day.updated_at = now;
            wallet.credit(Balance::Coins, MESSAGING.chat_reward);
            wallet.updated_at = now;
            tx_put(dt, &dkey, &day)?;
            tx_put(wt, wkey, &wallet)?;
            Ok(day.rewards_claimed)
        })
        .map_err(flatten)
}

// --- Routes ---

/// GET /api/rewards/activity-status
pub async fn activity_status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let s = today_session(&state.store, &user.user_id, now)?;
    let towards_next = s.total_active_minutes % ACTIVITY.minutes_required;
    Ok(Json(json!({
        "today": s.date,
        "total_active_minutes": s.total_active_minutes,
        "minutes_towards_next": towards_next,
        "minutes_required": ACTIVITY.minutes_required,
        "progress_percent": towards_next as f64 / ACTIVITY.minutes_required as f64 * 100.0,
        "rewards_claimed_today": s.rewards_claimed,
        "rewards_available": s.rewards_available(),
        "max_daily_rewards": ACTIVITY.max_daily_rewards,
        "coins_per_reward": ACTIVITY.coins_reward,
    })))
}

/// POST /api/rewards/track-activity
///
/// Called once a minute by an active client.
pub async fn track_activity(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("rewards");
    let s = track(&state.store, &user.user_id, Utc::now())?;
    let available = s.rewards_available();
    Ok(Json(json!({
        "success": true,
        "total_active_minutes": s.total_active_minutes,
        "rewards_available": available,
        "can_claim": available > 0,
    })))
}

/// POST /api/rewards/claim-activity-reward
pub async fn claim_activity_reward(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("rewards");
    let now = Utc::now();
    let c = claim(&state.store, &user.user_id, now)?;

    let mut description = format!("Activity reward ({}/{})", c.rewards_claimed, ACTIVITY.max_daily_rewards);
    if c.first_of_day {
        description.push_str(" + Daily bonus");
    }
    let tx = WalletTransaction::new(&user.user_id, TxType::ActivityReward, c.reward, now)
        .describe(description)
        .save(&state.store)?;
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Reward,
        "Activity Reward Claimed! 🎉",
        &format!("You earned {} coins for being active!", c.reward),
        Some("/rewards"),
        now,
    )?;

    Ok(Json(json!({
        "success": true,
        "reward_amount": c.reward,
        "is_first_reward": c.first_of_day,
        "daily_bonus_included": c.first_of_day,
        "rewards_claimed_today": c.rewards_claimed,
        "wallet_balance": c.coins_balance,
        "transaction_id": tx.transaction_id,
    })))
}

/// GET /api/rewards/daily-summary
pub async fn daily_summary(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let today = now.date_naive();
    let week_ago = today - Duration::days(7);
    let weekly: Vec<ActivitySession> = state
        .store
        .scan_prefix::<ActivitySession>(trees::ACTIVITY, owner_prefix(&user.user_id))?
        .into_iter()
        .filter(|s| s.date >= week_ago)
        .collect();

    let midnight = today
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| ApiError::Internal("midnight out of range".into()))?;
    let today_rewards = crate::wallet::transactions_since(&state.store, &user.user_id, TxType::ActivityReward, midnight)?;
    let earned: Amount = today_rewards.iter().map(|t| t.amount).sum();

    Ok(Json(json!({
        "today": today,
        "total_earned_today": earned,
        "rewards_today": today_rewards.len(),
        "activity_streak": streak(&weekly, today),
        "weekly_activities": weekly,
        "config": ACTIVITY,
    })))
}

/// POST /api/messages/reward
pub async fn claim_message_reward(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("rewards");
    let now = Utc::now();
    let count = claim_messaging(&state.store, &user.user_id, now)?;
    WalletTransaction::new(&user.user_id, TxType::MessagingReward, MESSAGING.chat_reward, now)
        .describe(format!("Chat reward ({count}/{})", MESSAGING.max_daily_chat_rewards))
        .save(&state.store)?;
    Ok(Json(json!({
        "success": true,
        "reward_amount": MESSAGING.chat_reward,
        "rewards_claimed_today": count,
        "max_daily_rewards": MESSAGING.max_daily_chat_rewards,
    })))
}

/// GET /api/messages/reward-status
pub async fn message_reward_status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let count = messaging_today(&state.store, &user.user_id, Utc::now())?;
    Ok(Json(json!({
        "rewards_claimed_today": count,
        "max_daily_rewards": MESSAGING.max_daily_chat_rewards,
        "reward_per_chat": MESSAGING.chat_reward,
        "total_earned_today": MESSAGING.chat_reward.times(count),
        "can_claim_more": count < MESSAGING.max_daily_chat_rewards,
    })))
}
