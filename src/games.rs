//! Mind-games hub and the daily spin wheel.

use axum::{extract::State, Json};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::{ApiError, ApiResult};
use crate::money::Amount;
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, owned_key, trees, tx_get, tx_put, Store};
use crate::vip;
use crate::wallet::{Balance, TxType, Wallet, WalletTransaction};

pub const SPIN_COST: Amount = Amount::from_major(10);

#[derive(Debug, Clone, Serialize)]
pub struct Game {
    pub game_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub exclusive: bool,
}

pub static GAMES: [Game; 5] = [
    Game { game_id: "spin_wheel", name: "Lucky Spin", description: "Spin the wheel for coin prizes.", exclusive: false },
    Game { game_id: "memory_match", name: "Memory Match", description: "Flip cards and find the pairs.", exclusive: false },
    Game { game_id: "number_puzzle", name: "Number Puzzle", description: "Slide tiles into order.", exclusive: false },
    Game { game_id: "chess_puzzles", name: "Chess Puzzles", description: "Mate-in-two challenges.", exclusive: true },
    Game { game_id: "vip_trivia", name: "VIP Trivia", description: "Timed general knowledge rounds.", exclusive: true },
];

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Prize {
    pub label: &'static str,
    pub coins: Amount,
    pub weight: u32,
}

pub static PRIZES: [Prize; 7] = [
    Prize { label: "Try again", coins: Amount::ZERO, weight: 45 },
    Prize { label: "2 coins", coins: Amount::from_major(2), weight: 20 },
    Prize { label: "5 coins", coins: Amount::from_major(5), weight: 15 },
    Prize { label: "10 coins", coins: Amount::from_major(10), weight: 10 },
    Prize { label: "25 coins", coins: Amount::from_major(25), weight: 6 },
    Prize { label: "50 coins", coins: Amount::from_major(50), weight: 3 },
    Prize { label: "Jackpot", coins: Amount::from_major(200), weight: 1 },
];

pub fn total_weight() -> u32 {
    PRIZES.iter().map(|p| p.weight).sum()
}

/// Prize for a roll in `0..total_weight()`.
pub fn prize_for_roll(roll: u32) -> &'static Prize {
    let mut acc = 0;
    for p in &PRIZES {
        acc += p.weight;
        if roll < acc {
            return p;
        }
    }
    &PRIZES[0]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpinDay {
    pub user_id: String,
    pub date: NaiveDate,
    pub free_used: u32,
    pub paid_spins: u32,
    pub total_won: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpinOutcome {
    pub spin_id: String,
    pub prize: &'static Prize,
    pub free: bool,
    pub cost: Amount,
    pub coins_balance: Amount,
    pub free_spins_remaining: u32,
}

fn day_key(user_id: &str, day: NaiveDate) -> Vec<u8> {
    owned_key(user_id, &day.format("%Y-%m-%d").to_string())
}

pub fn spin_day(store: &Store, user_id: &str, now: DateTime<Utc>) -> ApiResult<Option<SpinDay>> {
    store.get(trees::SPINS, day_key(user_id, now.date_naive()))
}

/// Spend a free spin if one is left today, otherwise pay `SPIN_COST`, and
/// credit the prize. The roll is taken by the caller.
pub fn spin(store: &Store, user_id: &str, free_allowance: u32, roll: u32, now: DateTime<Utc>) -> ApiResult<SpinOutcome> {
    let prize = prize_for_roll(roll);
    let spins = store.tree(trees::SPINS)?;
    let wallets = store.tree(trees::WALLETS)?;
    let skey = day_key(user_id, now.date_naive());
    let wkey = user_id.as_bytes();
    let spin_id = new_id("spin");
    (&spins, &wallets)
        .transaction(|(st, wt)| {
            let mut day = tx_get::<SpinDay>(st, &skey)?.unwrap_or_else(|| SpinDay {
                user_id: user_id.to_string(),
                date: now.date_naive(),
                free_used: 0,
                paid_spins: 0,
                total_won: Amount::ZERO,
            });
            let Some(mut w) = tx_get::<Wallet>(wt, wkey)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            let free = day.free_used < free_allowance;
            let cost = if free {
                day.free_used += 1;
                Amount::ZERO
            } else {
                w.debit(Balance::Coins, SPIN_COST).map_err(ConflictableTransactionError::Abort)?;
                day.paid_spins += 1;
                SPIN_COST
            };
            w.credit(Balance::Coins, prize.coins);
            w.updated_at = now;
            day.total_won += prize.coins;
            tx_put(st, &skey, &day)?;
            tx_put(wt, wkey, &w)?;
            Ok(SpinOutcome {
                spin_id: spin_id.clone(),
                prize,
                free,
                cost,
                coins_balance: w.coins_balance,
                free_spins_remaining: free_allowance.saturating_sub(day.free_used),
            })
        })
        .map_err(flatten)
}

// --- Routes ---

/// GET /api/games
pub async fn list(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> ApiResult<Json<Value>> {
    let vip_games = match &user {
        Some(u) => vip::benefits_for(&state.store, &u.user_id, Utc::now())?.exclusive_games,
        None => false,
    };
    let games: Vec<Value> = GAMES
        .iter()
        .map(|g| {
            json!({
                "game_id": g.game_id,
                "name": g.name,
                "description": g.description,
                "exclusive": g.exclusive,
                "playable": !g.exclusive || vip_games,
            })
        })
        .collect();
    Ok(Json(json!({ "games": games })))
}

/// GET /api/games/spin-status
pub async fn spin_status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let allowance = vip::benefits_for(&state.store, &user.user_id, now)?.free_spins_daily;
    let used = spin_day(&state.store, &user.user_id, now)?.map_or(0, |d| d.free_used);
    Ok(Json(json!({
        "free_spins_daily": allowance,
        "free_spins_used": used,
        "free_spins_remaining": allowance.saturating_sub(used),
        "spin_cost": SPIN_COST,
        "prizes": PRIZES,
    })))
}

/// POST /api/games/spin
pub async fn spin_handler(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    state.metrics.hit("games");
    let now = Utc::now();
    let allowance = vip::benefits_for(&state.store, &user.user_id, now)?.free_spins_daily;
    let roll = rand::thread_rng().gen_range(0..total_weight());
    let out = spin(&state.store, &user.user_id, allowance, roll, now)?;

    if out.cost.is_positive() {
        WalletTransaction::new(&user.user_id, TxType::GameBet, -out.cost, now)
            .reference(&out.spin_id)
            .describe("Lucky Spin")
            .save(&state.store)?;
    }
    if out.prize.coins.is_positive() {
        WalletTransaction::new(&user.user_id, TxType::GameWin, out.prize.coins, now)
            .reference(&out.spin_id)
            .describe(format!("Lucky Spin prize: {}", out.prize.label))
            .save(&state.store)?;
    }
    Ok(Json(json!({ "success": true, "result": out })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolls_map_onto_weights() {
        assert_eq!(total_weight(), 100);
        assert_eq!(prize_for_roll(0).label, "Try again");
        assert_eq!(prize_for_roll(44).label, "Try again");
        assert_eq!(prize_for_roll(45).coins, Amount::from_major(2));
        assert_eq!(prize_for_roll(99).label, "Jackpot");
    }

    #[test]
    fn free_spins_first_then_paid() {
        let store = Store::temporary().unwrap();
        let now = Utc::now();
        store
            .put(trees::WALLETS, "u", &Wallet::new("u", Amount::from_major(15), Amount::ZERO, now))
            .unwrap();

        let a = spin(&store, "u", 1, 0, now).unwrap();
        assert!(a.free);
        assert_eq!(a.free_spins_remaining, 0);
        assert_eq!(a.coins_balance, Amount::from_major(15));

        let b = spin(&store, "u", 1, 99, now).unwrap();
        assert!(!b.free);
        assert_eq!(b.coins_balance, Amount::from_major(205));

        let day = spin_day(&store, "u", now).unwrap().unwrap();
        assert_eq!((day.free_used, day.paid_spins), (1, 1));
    }

    #[test]
    fn paid_spin_needs_coins() {
        let store = Store::temporary().unwrap();
        let now = Utc::now();
        store
            .put(trees::WALLETS, "u", &Wallet::new("u", Amount::from_major(5), Amount::ZERO, now))
            .unwrap();
        let err = spin(&store, "u", 0, 99, now).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient coins balance");
        assert!(spin_day(&store, "u", now).unwrap().is_none());
    }
}
