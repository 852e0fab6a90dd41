//! Muqaddas Network backend: user wallets, VIP subscriptions, transparent
//! charity donations and the engagement features built around them.

pub mod agency;
pub mod auth;
pub mod charity;
pub mod config;
pub mod donations;
pub mod education;
pub mod error;
pub mod games;
pub mod gifts;
pub mod health;
pub mod metrics;
pub mod money;
pub mod notifications;
pub mod rewards;
pub mod routes;
pub mod split;
pub mod state;
pub mod store;
pub mod vip;
pub mod wallet;
pub mod withdrawal;
