//! Donations, the three-bucket split ledger and the public totals.
//!
//! A donation is created `pending` with its split precomputed and a UPI
//! deep link the client shows as a QR code. Confirmation is a single sled
//! transaction spanning the donation, ledger, totals, donor-set, public feed
//! and charity trees; ledger entries exist only for confirmed donations.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sled::Transactional;
use tracing::info;

use crate::auth::CurrentUser;
use crate::charity::{self, Contribution, ContributionSource};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::money::Amount;
use crate::notifications::{notify, NotificationKind};
use crate::split::{split, Bucket, DonationSplit};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, owned_key, timeline_key, trees, tx_get, tx_put, Store, GLOBAL_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: String,
    pub user_id: String,
    pub amount: Amount,
    pub donor_name: String,
    pub donor_phone: Option<String>,
    pub message: Option<String>,
    pub anonymous: bool,
    pub charity_contribution: Amount,
    pub vip_income: Amount,
    pub family_equity: Amount,
    pub status: DonationStatus,
    pub payment_uri: String,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Donation {
    pub fn split(&self) -> DonationSplit {
        DonationSplit {
            charity: self.charity_contribution,
            vip_income: self.vip_income,
            family_equity: self.family_equity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub donation_id: String,
    pub user_id: String,
    pub bucket: Bucket,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DonationTotals {
    pub total_donations: Amount,
    pub charity_fund: Amount,
    pub vip_income: Amount,
    pub family_equity: Amount,
    pub donation_count: u64,
    pub total_donors: u64,
}

/// Timeline owner of the public feed index.
const FEED: &str = "confirmed";

/// `upi://pay` link for the external payment rail. The donation id rides
/// in the transaction note so the payment can be matched back.
pub fn payment_uri(payee: &str, payee_name: &str, amount: Amount, donation_id: &str) -> String {
    let cents = amount.cents();
    format!(
        "upi://pay?pa={}&pn={}&am={}.{:02}&cu=INR&tn={}",
        urlencoding::encode(payee),
        urlencoding::encode(payee_name),
        cents / 100,
        cents % 100,
        urlencoding::encode(donation_id),
    )
}

pub struct NewDonation {
    pub amount: Amount,
    pub donor_name: String,
    pub donor_phone: Option<String>,
    pub message: Option<String>,
    pub anonymous: bool,
}

pub fn create(state: &AppState, user_id: &str, req: NewDonation, now: DateTime<Utc>) -> ApiResult<Donation> {
    let s = &state.settings;
    if !req.amount.is_positive() {
        return Err(ApiError::bad_request("Amount must be positive"));
    }
    if req.amount > s.max_donation {
        return Err(ApiError::bad_request(format!("Maximum donation is {}", s.max_donation)));
    }
    let donor_name = req.donor_name.trim();
    if donor_name.is_empty() {
        return Err(ApiError::bad_request("Donor name is required"));
    }

    let parts = split(req.amount, &s.split);
    let id = new_id("don");
    let donation = Donation {
        payment_uri: payment_uri(&s.upi_id, &s.payee_name, req.amount, &id),
        id,
        user_id: user_id.to_string(),
        amount: req.amount,
        donor_name: donor_name.to_string(),
        donor_phone: req.donor_phone.filter(|p| !p.trim().is_empty()),
        message: req.message.filter(|m| !m.trim().is_empty()),
        anonymous: req.anonymous,
        charity_contribution: parts.charity,
        vip_income: parts.vip_income,
        family_equity: parts.family_equity,
        status: DonationStatus::Pending,
        payment_reference: None,
        created_at: now,
        confirmed_at: None,
    };
    state.store.put(trees::DONATIONS, &donation.id, &donation)?;
    state.store.put(
        trees::DONATIONS_BY_USER,
        timeline_key(user_id, now, &donation.id),
        &donation.id,
    )?;
    Ok(donation)
}

/// Mark a pending donation confirmed and post its ledger entries.
pub fn confirm(
    store: &Store,
    user_id: &str,
    donation_id: &str,
    payment_reference: Option<String>,
    now: DateTime<Utc>,
) -> ApiResult<Donation> {
    let donations = store.tree(trees::DONATIONS)?;
    let ledger = store.tree(trees::DONATION_LEDGER)?;
    let totals = store.tree(trees::DONATION_TOTALS)?;
    let donors = store.tree(trees::DONORS)?;
    let feed = store.tree(trees::DONATION_FEED)?;
    let charity_wallet = store.tree(trees::CHARITY)?;
    let contributions = store.tree(trees::CHARITY_CONTRIBUTIONS)?;
    let key = donation_id.as_bytes();

    (&donations, &ledger, &totals, &donors, &feed, &charity_wallet, &contributions)
        .transaction(|(dt, lt, tt, rt, ft, ct, kt)| {
            let Some(mut d) = tx_get::<Donation>(dt, key)? else {
                return abort(ApiError::NotFound("Donation not found"));
            };
            if d.user_id != user_id {
                return abort(ApiError::NotFound("Donation not found"));
            }
            if d.status == DonationStatus::Confirmed {
                return abort(ApiError::Conflict("Donation already confirmed".into()));
            }
            d.status = DonationStatus::Confirmed;
            d.confirmed_at = Some(now);
            d.payment_reference = payment_reference.clone();
            tx_put(dt, key, &d)?;

            let parts = d.split();
            for bucket in Bucket::ALL {
                let entry = LedgerEntry {
                    entry_id: new_id("led"),
                    donation_id: d.id.clone(),
                    user_id: d.user_id.clone(),
                    bucket,
                    amount: parts.get(bucket),
                    created_at: now,
                };
                tx_put(lt, &owned_key(&d.id, bucket.as_str()), &entry)?;
            }

            let mut t = tx_get::<DonationTotals>(tt, GLOBAL_KEY)?.unwrap_or_default();
            t.total_donations += d.amount;
            t.charity_fund += parts.charity;
            t.vip_income += parts.vip_income;
            t.family_equity += parts.family_equity;
            t.donation_count += 1;
            if rt.get(d.user_id.as_bytes())?.is_none() {
                tx_put(rt, d.user_id.as_bytes(), &now)?;
                t.total_donors += 1;
            }
            tx_put(tt, GLOBAL_KEY, &t)?;
            tx_put(ft, &timeline_key(FEED, now, &d.id), &d.id)?;

            if parts.charity.is_positive() {
                let c = Contribution::new(&d.user_id, parts.charity, ContributionSource::Donation, &d.id, now);
                charity::credit_tx(ct, kt, &c)?;
            }
            Ok(d)
        })
        .map_err(flatten)
}

pub fn ledger_for(store: &Store, donation_id: &str) -> ApiResult<Vec<LedgerEntry>> {
    store.scan_prefix(trees::DONATION_LEDGER, crate::store::owner_prefix(donation_id))
}

pub fn totals(store: &Store) -> ApiResult<DonationTotals> {
    Ok(store.get(trees::DONATION_TOTALS, GLOBAL_KEY)?.unwrap_or_default())
}

/// Most recently confirmed donations, newest first.
pub fn recent_confirmed(store: &Store, limit: usize) -> ApiResult<Vec<Donation>> {
    let ids: Vec<String> = store.latest(trees::DONATION_FEED, FEED, limit)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(d) = store.get::<Donation>(trees::DONATIONS, &id)? {
            out.push(d);
        }
    }
    Ok(out)
}

pub fn user_donations(store: &Store, user_id: &str) -> ApiResult<Vec<Donation>> {
    let (ids, _) = store.timeline_page::<String, _>(trees::DONATIONS_BY_USER, user_id, 0, usize::MAX, |_| true)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(d) = store.get::<Donation>(trees::DONATIONS, &id)? {
            out.push(d);
        }
    }
    Ok(out)
}

// --- DTOs ---

#[derive(Debug, Deserialize)]
pub struct CreateReq {
    pub amount: Amount,
    pub donor_name: Option<String>,
    pub donor_phone: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmReq {
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_feed_limit")]
    pub limit: usize,
}

fn default_feed_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct PublicDonation {
    pub id: String,
    pub donor_name: String,
    pub amount: Amount,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Donation> for PublicDonation {
    fn from(d: Donation) -> Self {
        Self {
            donor_name: if d.anonymous { "Anonymous".to_string() } else { d.donor_name },
            id: d.id,
            amount: d.amount,
            message: d.message,
            created_at: d.confirmed_at.unwrap_or(d.created_at),
        }
    }
}

// --- Routes ---

/// POST /api/donations
pub async fn create_donation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(req), _): JsonBody<CreateReq>,
) -> ApiResult<Json<Donation>> {
    state.metrics.hit("donations");
    let now = Utc::now();
    let new = NewDonation {
        amount: req.amount,
        donor_name: req.donor_name.unwrap_or_else(|| user.name.clone()),
        donor_phone: req.donor_phone.or_else(|| user.phone.clone()),
        message: req.message,
        anonymous: req.anonymous,
    };
    let donation = create(&state, &user.user_id, new, now)?;
    state.metrics.donations_created.inc();
    info!(user_id = %user.user_id, donation_id = %donation.id, amount = %donation.amount, "donation created");
    Ok(Json(donation))
}

/// GET /api/donations
pub async fn my_donations(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Vec<Donation>>> {
    Ok(Json(user_donations(&state.store, &user.user_id)?))
}

/// GET /api/donations/all
///
/// Confirmed donations only, newest first, without contact details.
pub async fn public_feed(State(state): State<AppState>, Query(q): Query<FeedQuery>) -> ApiResult<Json<Vec<PublicDonation>>> {
    let confirmed = recent_confirmed(&state.store, q.limit.clamp(1, 100))?;
    Ok(Json(confirmed.into_iter().map(PublicDonation::from).collect()))
}

/// PUT /api/donations/:donation_id/confirm
pub async fn confirm_donation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(donation_id): Path<String>,
    body: Option<Json<ConfirmReq>>,
) -> ApiResult<Json<Value>> {
    state.metrics.hit("donations");
    let now = Utc::now();
    let reference = body
        .and_then(|Json(b)| b.payment_reference)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let donation = confirm(&state.store, &user.user_id, &donation_id, reference, now)?;
    notify(
        &state.store,
        &user.user_id,
        NotificationKind::Donation,
        "Donation Confirmed 🙏",
        &format!(
            "Thank you! {} of your {} donation goes to the charity fund.",
            donation.charity_contribution, donation.amount
        ),
        Some("/donations"),
        now,
    )?;
    state.metrics.donations_confirmed.inc();
    info!(user_id = %user.user_id, donation_id = %donation.id, "donation confirmed");
    Ok(Json(json!({ "success": true, "donation": donation })))
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let t = totals(&state.store)?;
    let mine: Vec<Donation> = user_donations(&state.store, &user.user_id)?
        .into_iter()
        .filter(|d| d.status == DonationStatus::Confirmed)
        .collect();
    let my_total: Amount = mine.iter().map(|d| d.amount).sum();
    Ok(Json(json!({
        "total_donations": t.total_donations,
        "charity_fund": t.charity_fund,
        "vip_income": t.vip_income,
        "family_equity": t.family_equity,
        "total_donors": t.total_donors,
        "donation_count": t.donation_count,
        "my_donations": my_total,
        "my_donation_count": mine.len(),
    })))
}

/// GET /api/stats/public
pub async fn public_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let t = totals(&state.store)?;
    Ok(Json(json!({
        "total_donations": t.total_donations,
        "charity_fund": t.charity_fund,
        "total_donors": t.total_donors,
        "family_equity_percent": state.settings.split.family_equity.as_percent(),
    })))
}

/// GET /api/family-equity
pub async fn family_equity(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let t = totals(&state.store)?;
    Ok(Json(json!({
        "equity_percent": state.settings.split.family_equity.as_percent(),
        "status": "locked",
        "transferable": false,
        "beneficiaries": state.settings.beneficiaries,
        "accumulated": t.family_equity,
        "message": "Family equity is permanently locked and cannot be transferred.",
    })))
}
