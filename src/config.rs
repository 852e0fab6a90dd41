//! Node configuration.
//!
//! `muqaddas.toml` is optional; every section and key may be omitted.
//! Environment variables override the file, and CLI flags override both.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use crate::money::{Amount, Bps};
use crate::split::SplitRatios;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCfg {
    pub bind: Option<String>,
    pub cors_origins: Option<Vec<String>>,
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageCfg {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthCfg {
    pub session_ttl_days: Option<i64>,
    pub cookie_secure: Option<bool>,
    pub oauth_session_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WalletCfg {
    pub welcome_coins: Option<f64>,
    pub welcome_bonus: Option<f64>,
    pub max_deposit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DonationCfg {
    /// Charity share in basis points.
    pub charity_bps: Option<u32>,
    /// Family equity share in basis points.
    pub family_equity_bps: Option<u32>,
    pub max_amount: Option<f64>,
    pub upi_id: Option<String>,
    pub payee_name: Option<String>,
    pub beneficiaries: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VipCfg {
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub server: Option<ServerCfg>,
    pub storage: Option<StorageCfg>,
    pub auth: Option<AuthCfg>,
    pub wallet: Option<WalletCfg>,
    pub donation: Option<DonationCfg>,
    pub vip: Option<VipCfg>,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            let s = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.as_ref().display()))?;
            let cfg: AppConfig = toml::from_str(&s)
                .with_context(|| format!("parsing {}", path.as_ref().display()))?;
            Ok(cfg)
        } else {
            Ok(Default::default())
        }
    }

    fn env(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    fn resolve_string(env_key: &str, toml_opt: Option<String>, default_: &str) -> String {
        Self::env(env_key)
            .or(toml_opt)
            .unwrap_or_else(|| default_.to_string())
    }

    fn resolve_parsed<T: std::str::FromStr>(env_key: &str, toml_opt: Option<T>, default_: T) -> T {
        Self::env(env_key)
            .and_then(|s| s.parse().ok())
            .or(toml_opt)
            .unwrap_or(default_)
    }

    fn resolve_amount(toml_opt: Option<f64>, default_: Amount) -> Amount {
        toml_opt.and_then(Amount::from_f64).unwrap_or(default_)
    }

    pub fn resolved(&self) -> Result<Settings> {
        let server = self.server.clone().unwrap_or_default();
        let storage = self.storage.clone().unwrap_or_default();
        let auth = self.auth.clone().unwrap_or_default();
        let wallet = self.wallet.clone().unwrap_or_default();
        let donation = self.donation.clone().unwrap_or_default();
        let vip = self.vip.clone().unwrap_or_default();

        let ratios = SplitRatios {
            charity: Bps(Self::resolve_parsed(
                "MUQADDAS_CHARITY_BPS",
                donation.charity_bps,
                SplitRatios::DEFAULT.charity.0,
            )),
            family_equity: Bps(Self::resolve_parsed(
                "MUQADDAS_FAMILY_EQUITY_BPS",
                donation.family_equity_bps,
                SplitRatios::DEFAULT.family_equity.0,
            )),
        };
        if let Err(e) = ratios.validate() {
            bail!("invalid donation split: {e}");
        }

        let ttl_days = Self::resolve_parsed("MUQADDAS_SESSION_TTL_DAYS", auth.session_ttl_days, 7);
        if ttl_days <= 0 {
            bail!("session_ttl_days must be positive");
        }

        let cors_origins = Self::env("MUQADDAS_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .or(server.cors_origins)
            .unwrap_or_default();

        Ok(Settings {
            bind: Self::resolve_string("MUQADDAS_BIND", server.bind, "0.0.0.0:8001"),
            cors_origins,
            admin_token: Self::env("MUQADDAS_ADMIN_TOKEN").or(server.admin_token),
            db_path: Self::resolve_string("MUQADDAS_DB_PATH", storage.path, "data/muqaddas"),
            session_ttl: chrono::Duration::days(ttl_days),
            cookie_secure: Self::resolve_parsed("MUQADDAS_COOKIE_SECURE", auth.cookie_secure, true),
            oauth_session_url: Self::resolve_string(
                "MUQADDAS_OAUTH_URL",
                auth.oauth_session_url,
                "https://demobackend.emergentagent.com/auth/v1/env/oauth/session-data",
            ),
            welcome_coins: Self::resolve_amount(wallet.welcome_coins, Amount::from_major(1000)),
            welcome_bonus: Self::resolve_amount(wallet.welcome_bonus, Amount::from_major(100)),
            max_deposit: Self::resolve_amount(wallet.max_deposit, Amount::from_major(100_000)),
            split: ratios,
            max_donation: Self::resolve_amount(donation.max_amount, Amount::from_major(10_000_000)),
            upi_id: Self::resolve_string("MUQADDAS_UPI_ID", donation.upi_id, "muqaddas@upi"),
            payee_name: donation
                .payee_name
                .unwrap_or_else(|| "Muqaddas Network".to_string()),
            beneficiaries: donation.beneficiaries.unwrap_or_else(|| {
                vec![
                    "Muqaddas family trust".to_string(),
                    "Cancer patient support fund".to_string(),
                ]
            }),
            sweep_interval: Duration::from_secs(Self::resolve_parsed(
                "MUQADDAS_SWEEP_SECS",
                vip.sweep_interval_secs,
                300,
            )),
        })
    }
}

/// Fully resolved settings shared by every handler.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub cors_origins: Vec<String>,
    pub admin_token: Option<String>,
    pub db_path: String,
    pub session_ttl: chrono::Duration,
    pub cookie_secure: bool,
    pub oauth_session_url: String,
    pub welcome_coins: Amount,
    pub welcome_bonus: Amount,
    pub max_deposit: Amount,
    pub split: SplitRatios,
    pub max_donation: Amount,
    pub upi_id: String,
    pub payee_name: String,
    pub beneficiaries: Vec<String>,
    pub sweep_interval: Duration,
}
