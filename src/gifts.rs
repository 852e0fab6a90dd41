//! Gift catalog and coin → star gifting between users.
//!
//! A sent gift debits the sender's coins, credits the receiver's stars minus
//! the charity share, and records the charity contribution, all in one
//! transaction. Records are stored twice, on the sender's `sent:` timeline
//! and on the receiver's `recv:` timeline.

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sled::Transactional;
use std::collections::HashMap;
use tracing::info;

use crate::auth::{find_user, CurrentUser, User};
use crate::charity::{self, Contribution, ContributionSource, GIFT_CHARITY};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::Amount;
use crate::notifications::{notify, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, timeline_key, trees, tx_get, tx_put, Store};
use crate::wallet::{Balance, TxType, Wallet, WalletTransaction};

pub const MAX_QUANTITY: u32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiftCategory {
    Basic,
    Premium,
    Signature,
    Special,
}

impl GiftCategory {
    pub const ALL: [GiftCategory; 4] = [
        GiftCategory::Basic,
        GiftCategory::Premium,
        GiftCategory::Signature,
        GiftCategory::Special,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GiftCategory::Basic => "basic",
            GiftCategory::Premium => "premium",
            GiftCategory::Signature => "signature",
            GiftCategory::Special => "special",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Gift {
    pub gift_id: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub price: Amount,
    pub category: GiftCategory,
    pub animation: &'static str,
    pub exclusive: bool,
}

const fn gift(
    gift_id: &'static str,
    name: &'static str,
    emoji: &'static str,
    price: i64,
    category: GiftCategory,
    animation: &'static str,
) -> Gift {
    Gift {
        gift_id,
        name,
        emoji,
        price: Amount::from_major(price),
        category,
        animation,
        exclusive: matches!(category, GiftCategory::Signature),
    }
}

use GiftCategory::*;

pub static CATALOG: [Gift; 18] = [
    gift("rose", "Red Rose", "rose", 10, Basic, "float"),
    gift("heart", "Love Heart", "heart", 20, Basic, "pulse"),
    gift("star", "Shining Star", "star", 30, Basic, "sparkle"),
    gift("coffee", "Hot Coffee", "coffee", 15, Basic, "steam"),
    gift("kiss", "Flying Kiss", "kiss", 25, Basic, "fly"),
    gift("diamond_ring", "Diamond Ring", "ring", 500, Premium, "shine"),
    gift("gold_crown", "Royal Crown", "crown", 1000, Premium, "glow"),
    gift("sports_car", "Sports Car", "car", 2000, Premium, "drive"),
    gift("private_jet", "Private Jet", "airplane", 5000, Premium, "takeoff"),
    gift("yacht", "Luxury Yacht", "boat", 8000, Premium, "wave"),
    gift("mugaddas_star", "Mugaddas Star", "sparkles", 10000, Signature, "supernova"),
    gift("golden_palace", "Golden Palace", "castle", 25000, Signature, "build"),
    gift("universe", "Gift of Universe", "galaxy", 50000, Signature, "cosmic"),
    gift("eternal_love", "Eternal Love", "infinity", 100000, Signature, "eternal"),
    gift("birthday_cake", "Birthday Cake", "cake", 100, Special, "candles"),
    gift("fireworks", "Fireworks", "fireworks", 200, Special, "explode"),
    gift("trophy", "Winner Trophy", "trophy", 300, Special, "shine"),
    gift("lucky_charm", "Lucky Charm", "clover", 88, Special, "lucky"),
];

static BY_ID: Lazy<HashMap<&'static str, &'static Gift>> =
    Lazy::new(|| CATALOG.iter().map(|g| (g.gift_id, g)).collect());

pub fn find_gift(id: &str) -> Option<&'static Gift> {
    BY_ID.get(id).copied()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftRecord {
    pub gift_record_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub gift_id: String,
    pub gift_name: String,
    pub gift_price: Amount,
    pub quantity: u32,
    pub total_value: Amount,
    pub message: Option<String>,
    pub charity_amount: Amount,
    pub receiver_amount: Amount,
    pub created_at: DateTime<Utc>,
}

fn sent_owner(user_id: &str) -> String {
    format!("sent:{user_id}")
}

fn recv_owner(user_id: &str) -> String {
    format!("recv:{user_id}")
}

/// Move coins from sender to receiver as stars, less the charity share.
pub fn transfer_gift(
    store: &Store,
    sender: &User,
    receiver_id: &str,
    gift: &Gift,
    quantity: u32,
    message: Option<String>,
    now: DateTime<Utc>,
) -> ApiResult<GiftRecord> {
    if !(1..=MAX_QUANTITY).contains(&quantity) {
        return Err(ApiError::bad_request(format!("Quantity must be between 1 and {MAX_QUANTITY}")));
    }
    if receiver_id == sender.user_id {
        return Err(ApiError::bad_request("Cannot send gift to yourself"));
    }

    let total = gift.price.times(quantity);
    let charity_amount = total.percent(GIFT_CHARITY);
    let record = GiftRecord {
        gift_record_id: new_id("gift"),
        sender_id: sender.user_id.clone(),
        receiver_id: receiver_id.to_string(),
        gift_id: gift.gift_id.to_string(),
        gift_name: gift.name.to_string(),
        gift_price: gift.price,
        quantity,
        total_value: total,
        message,
        charity_amount,
        receiver_amount: total - charity_amount,
        created_at: now,
    };
    let contribution = Contribution::new(&sender.user_id, charity_amount, ContributionSource::Gift, &record.gift_record_id, now);

    let wallets = store.tree(trees::WALLETS)?;
    let charity_wallet = store.tree(trees::CHARITY)?;
    let contributions = store.tree(trees::CHARITY_CONTRIBUTIONS)?;
    let records = store.tree(trees::GIFT_RECORDS)?;
    (&wallets, &charity_wallet, &contributions, &records)
        .transaction(|(wt, ct, kt, gt)| {
            let skey = record.sender_id.as_bytes();
            let rkey = record.receiver_id.as_bytes();
            let Some(mut from) = tx_get::<Wallet>(wt, skey)? else {
                return abort(ApiError::NotFound("Wallet not found"));
            };
            let Some(mut to) = tx_get::<Wallet>(wt, rkey)? else {
                return abort(ApiError::NotFound("Receiver not found"));
            };
            from.debit(Balance::Coins, total)
                .map_err(sled::transaction::ConflictableTransactionError::Abort)?;
            from.updated_at = now;
            to.credit(Balance::Stars, record.receiver_amount);
            to.updated_at = now;
            tx_put(wt, skey, &from)?;
            tx_put(wt, rkey, &to)?;

            if charity_amount.is_positive() {
                charity::credit_tx(ct, kt, &contribution)?;
            }
            let id = &record.gift_record_id;
            tx_put(gt, &timeline_key(&sent_owner(&record.sender_id), now, id), &record)?;
            tx_put(gt, &timeline_key(&recv_owner(&record.receiver_id), now, id), &record)?;
            Ok(())
        })
        .map_err(flatten)?;
    Ok(record)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tally {
    pub total: Amount,
    pub count: u64,
}

/// Top `n` senders and receivers by total gift value.
pub fn rankings(store: &Store, n: usize) -> ApiResult<(Vec<(String, Tally)>, Vec<(String, Tally)>)> {
    let mut senders: HashMap<String, Tally> = HashMap::new();
    let mut receivers: HashMap<String, Tally> = HashMap::new();
    for r in store.scan_prefix::<GiftRecord>(trees::GIFT_RECORDS, b"sent:")? {
        let s = senders.entry(r.sender_id.clone()).or_default();
        s.total += r.total_value;
        s.count += r.quantity as u64;
        let t = receivers.entry(r.receiver_id).or_default();
        t.total += r.total_value;
        t.count += r.quantity as u64;
    }
    let top = |m: HashMap<String, Tally>| {
        let mut v: Vec<_> = m.into_iter().collect();
        v.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(&b.0)));
        v.truncate(n);
        v
    };
    Ok((top(senders), top(receivers)))
}

// --- DTOs ---

#[derive(Debug, Deserialize)]
pub struct SendGiftReq {
    pub gift_id: String,
    pub receiver_id: String,
    #[serde(default = "one")]
    pub quantity: u32,
    pub message: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

fn user_card(state: &AppState, user_id: &str) -> ApiResult<Value> {
    Ok(match find_user(state, user_id)? {
        Some(u) => json!({ "user_id": u.user_id, "name": u.name, "picture": u.picture }),
        None => Value::Null,
    })
}

// --- Routes ---

/// GET /api/gifts/catalog
pub async fn catalog() -> Json<Value> {
    let mut by_cat = Map::new();
    for cat in GiftCategory::ALL {
        let items: Vec<&Gift> = CATALOG.iter().filter(|g| g.category == cat).collect();
        by_cat.insert(cat.as_str().to_string(), json!(items));
    }
    let categories: Vec<&str> = GiftCategory::ALL.iter().map(|c| c.as_str()).collect();
    Json(json!({ "gifts": by_cat, "categories": categories }))
}

/// POST /api/gifts/send
pub async fn send(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<SendGiftReq>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("gifts");
    let gift = find_gift(&req.gift_id).ok_or(ApiError::NotFound("Gift not found"))?;
    let receiver = find_user(&state, &req.receiver_id)?.ok_or(ApiError::NotFound("Receiver not found"))?;
    let message = req.message.filter(|m| !m.trim().is_empty());

    let now = Utc::now();
    let r = transfer_gift(&state.store, &user, &receiver.user_id, gift, req.quantity, message, now)?;

    WalletTransaction::new(&user.user_id, TxType::GiftSent, -r.total_value, now)
        .reference(&r.gift_record_id)
        .describe(format!("Sent {}x {} to {}", r.quantity, gift.name, receiver.name))
        .save(&state.store)?;
    WalletTransaction::new(&receiver.user_id, TxType::GiftReceived, r.receiver_amount, now)
        .currency(Balance::Stars)
        .reference(&r.gift_record_id)
        .describe(format!("Received {}x {} from {}", r.quantity, gift.name, user.name))
        .save(&state.store)?;

    let mut text = format!("{} sent you {}x {}!", user.name, r.quantity, gift.name);
    if let Some(m) = &r.message {
        text.push_str(&format!("\nMessage: {m}"));
    }
    notify(&state.store, &receiver.user_id, NotificationKind::Gift, "Gift Received! 🎁", &text, Some("/gifts"), now)?;
    state.metrics.gifts_sent.inc();
    info!(sender = %user.user_id, receiver = %receiver.user_id, gift = gift.gift_id, total = %r.total_value, "gift sent");

    Ok(Json(json!({
        "success": true,
        "gift_record_id": r.gift_record_id,
        "gift": gift,
        "quantity": r.quantity,
        "total_cost": r.total_value,
        "charity_contribution": r.charity_amount,
        "receiver_earned": r.receiver_amount,
    })))
}

/// GET /api/gifts/sent
pub async fn sent(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let (records, _) = state.store.timeline_page::<GiftRecord, _>(
        trees::GIFT_RECORDS,
        &sent_owner(&user.user_id),
        0,
        q.limit.clamp(1, 100),
        |_| true,
    )?;
    let mut gifts = Vec::with_capacity(records.len());
    for r in records {
        let mut v = serde_json::to_value(&r)?;
        v["receiver"] = user_card(&state, &r.receiver_id)?;
        gifts.push(v);
    }
    Ok(Json(json!({ "gifts": gifts })))
}

/// GET /api/gifts/received
pub async fn received(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let (records, _) = state.store.timeline_page::<GiftRecord, _>(
        trees::GIFT_RECORDS,
        &recv_owner(&user.user_id),
        0,
        q.limit.clamp(1, 100),
        |_| true,
    )?;
    let mut gifts = Vec::with_capacity(records.len());
    for r in records {
        let mut v = serde_json::to_value(&r)?;
        v["sender"] = user_card(&state, &r.sender_id)?;
        gifts.push(v);
    }
    Ok(Json(json!({ "gifts": gifts })))
}

/// GET /api/gifts/leaderboard
pub async fn leaderboard(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (senders, receivers) = rankings(&state.store, 10)?;
    let mut top_senders = Vec::new();
    for (id, t) in senders {
        let card = user_card(&state, &id)?;
        if card.is_null() {
            continue;
        }
        top_senders.push(json!({
            "rank": top_senders.len() + 1,
            "user": card,
            "total_sent": t.total,
            "gifts_count": t.count,
        }));
    }
    let mut top_receivers = Vec::new();
    for (id, t) in receivers {
        let card = user_card(&state, &id)?;
        if card.is_null() {
            continue;
        }
        top_receivers.push(json!({
            "rank": top_receivers.len() + 1,
            "user": card,
            "total_received": t.total,
            "gifts_count": t.count,
        }));
    }
    Ok(Json(json!({ "top_senders": top_senders, "top_receivers": top_receivers })))
}
