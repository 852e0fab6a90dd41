//! sled-backed document store.
//!
//! One tree per collection, values encoded as JSON. Per-owner listings use
//! timeline keys (`<owner>/<millis BE><id>`) so a reversed prefix scan yields
//! newest-first without a secondary index.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::path::Path;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub mod trees {
    pub const USERS: &str = "users";
    pub const USERS_BY_EMAIL: &str = "users_by_email";
    pub const CREDENTIALS: &str = "credentials";
    pub const SESSIONS: &str = "user_sessions";
    pub const WALLETS: &str = "wallets";
    pub const TRANSACTIONS: &str = "wallet_transactions";
    pub const VIP_STATUS: &str = "vip_status";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const DONATIONS: &str = "donations";
    pub const DONATIONS_BY_USER: &str = "donations_by_user";
    pub const DONATION_LEDGER: &str = "donation_ledger";
    pub const DONATION_TOTALS: &str = "donation_totals";
    pub const DONORS: &str = "donors";
    pub const DONATION_FEED: &str = "donation_feed";
    pub const ACTIVITY: &str = "activity_sessions";
    pub const MESSAGING_REWARDS: &str = "messaging_rewards";
    pub const AGENCY: &str = "agency_status";
    pub const REFERRAL_CODES: &str = "referral_codes";
    pub const REFERRALS: &str = "referrals";
    pub const REFERRALS_BY_REFERRER: &str = "referrals_by_referrer";
    pub const COMMISSIONS: &str = "commissions";
    pub const PAYMENT_METHODS: &str = "payment_methods";
    pub const WITHDRAWALS: &str = "withdrawals";
    pub const CHARITY: &str = "charity_wallet";
    pub const CHARITY_CONTRIBUTIONS: &str = "charity_contributions";
    pub const GIFT_RECORDS: &str = "gift_records";
    pub const ENROLLMENTS: &str = "enrollments";
    pub const SPINS: &str = "game_spins";
}

/// Singleton key for trees holding one aggregate record.
pub const GLOBAL_KEY: &[u8] = b"global";

#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> ApiResult<Self> {
        std::fs::create_dir_all(path.as_ref())
            .map_err(|e| ApiError::Internal(format!("create {}: {e}", path.as_ref().display())))?;
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> ApiResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn tree(&self, name: &str) -> ApiResult<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    pub fn flush(&self) -> ApiResult<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, tree: &str, key: impl AsRef<[u8]>) -> ApiResult<Option<T>> {
        match self.tree(tree)?.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, tree: &str, key: impl AsRef<[u8]>, value: &T) -> ApiResult<()> {
        self.tree(tree)?
            .insert(key.as_ref(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// Insert only if the key is absent. Returns false when it already existed.
    pub fn put_new<T: Serialize>(&self, tree: &str, key: impl AsRef<[u8]>, value: &T) -> ApiResult<bool> {
        let bytes = serde_json::to_vec(value)?;
        let swapped = self
            .tree(tree)?
            .compare_and_swap(key.as_ref(), None as Option<&[u8]>, Some(bytes))?;
        Ok(swapped.is_ok())
    }

    pub fn remove(&self, tree: &str, key: impl AsRef<[u8]>) -> ApiResult<bool> {
        Ok(self.tree(tree)?.remove(key)?.is_some())
    }

    pub fn contains(&self, tree: &str, key: impl AsRef<[u8]>) -> ApiResult<bool> {
        Ok(self.tree(tree)?.contains_key(key)?)
    }

    /// Atomically read-modify-write one record. `f` may run more than once
    /// under contention, so it must not have side effects.
    pub fn update<T, R, F>(&self, tree: &str, key: impl AsRef<[u8]>, missing: &'static str, f: F) -> ApiResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&mut T) -> ApiResult<R>,
    {
        let key = key.as_ref();
        let tree = self.tree(tree)?;
        tree.transaction(|tx| {
            let Some(mut value) = tx_get::<T>(tx, key)? else {
                return abort(ApiError::NotFound(missing));
            };
            let out = f(&mut value).map_err(ConflictableTransactionError::Abort)?;
            tx_put(tx, key, &value)?;
            Ok(out)
        })
        .map_err(flatten)
    }

    /// Like [`Store::update`] but starts from `init()` when the key is absent.
    pub fn upsert<T, R, I, F>(&self, tree: &str, key: impl AsRef<[u8]>, init: I, f: F) -> ApiResult<R>
    where
        T: Serialize + DeserializeOwned,
        I: Fn() -> T,
        F: Fn(&mut T) -> ApiResult<R>,
    {
        let key = key.as_ref();
        let tree = self.tree(tree)?;
        tree.transaction(|tx| {
            let mut value = tx_get::<T>(tx, key)?.unwrap_or_else(&init);
            let out = f(&mut value).map_err(ConflictableTransactionError::Abort)?;
            tx_put(tx, key, &value)?;
            Ok(out)
        })
        .map_err(flatten)
    }

    pub fn scan_prefix<T: DeserializeOwned>(&self, tree: &str, prefix: impl AsRef<[u8]>) -> ApiResult<Vec<T>> {
        let mut out = Vec::new();
        for item in self.tree(tree)?.scan_prefix(prefix) {
            let (_, raw) = item?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    /// Newest `limit` records of a timeline, without touching older ones.
    pub fn latest<T: DeserializeOwned>(&self, tree: &str, owner: &str, limit: usize) -> ApiResult<Vec<T>> {
        let mut out = Vec::new();
        for item in self.tree(tree)?.scan_prefix(owner_prefix(owner)).rev().take(limit) {
            let (_, raw) = item?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    /// Newest-first page of a timeline prefix, keeping only records that
    /// match `keep`. Returns the page and the total number of matches.
    pub fn timeline_page<T, P>(
        &self,
        tree: &str,
        owner: &str,
        offset: usize,
        limit: usize,
        keep: P,
    ) -> ApiResult<(Vec<T>, usize)>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool,
    {
        let mut page = Vec::new();
        let mut total = 0usize;
        for item in self.tree(tree)?.scan_prefix(owner_prefix(owner)).rev() {
            let (_, raw) = item?;
            let value: T = serde_json::from_slice(&raw)?;
            if !keep(&value) {
                continue;
            }
            if total >= offset && page.len() < limit {
                page.push(value);
            }
            total += 1;
        }
        Ok((page, total))
    }

    pub fn values<T: DeserializeOwned>(&self, tree: &str) -> ApiResult<Vec<T>> {
        let mut out = Vec::new();
        for item in self.tree(tree)?.iter() {
            let (_, raw) = item?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    pub fn len(&self, tree: &str) -> ApiResult<usize> {
        Ok(self.tree(tree)?.len())
    }
}

/// `prefix_` followed by 12 hex characters.
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..12])
}

pub fn owner_prefix(owner: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(owner.len() + 1);
    k.extend_from_slice(owner.as_bytes());
    k.push(b'/');
    k
}

pub fn timeline_key(owner: &str, at: DateTime<Utc>, id: &str) -> Vec<u8> {
    let millis = at.timestamp_millis().max(0) as u64;
    let mut k = owner_prefix(owner);
    k.extend_from_slice(&millis.to_be_bytes());
    k.extend_from_slice(id.as_bytes());
    k
}

pub fn owned_key(owner: &str, id: &str) -> Vec<u8> {
    let mut k = owner_prefix(owner);
    k.extend_from_slice(id.as_bytes());
    k
}

pub fn abort<T>(e: ApiError) -> ConflictableTransactionResult<T, ApiError> {
    Err(ConflictableTransactionError::Abort(e))
}

pub fn tx_get<T: DeserializeOwned>(
    tx: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<T>, ApiError> {
    match tx.get(key)? {
        Some(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| ConflictableTransactionError::Abort(e.into())),
        None => Ok(None),
    }
}

pub fn tx_put<T: Serialize>(
    tx: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> ConflictableTransactionResult<(), ApiError> {
    let bytes = serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
    tx.insert(key, bytes)?;
    Ok(())
}

pub fn flatten(e: TransactionError<ApiError>) -> ApiError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => ApiError::Storage(e),
    }
}
