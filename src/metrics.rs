use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Prometheus collectors for the node. Each instance owns its registry, so
/// registration only fails on a malformed collector.
pub struct Metrics {
    registry: Registry,
    pub requests: IntCounterVec,
    pub donations_created: IntCounter,
    pub donations_confirmed: IntCounter,
    pub deposits: IntCounter,
    pub gifts_sent: IntCounter,
    pub vip_renewals: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("muqaddas_requests_total", "API requests by area"),
            &["area"],
        )?;
        let donations_created = IntCounter::new("muqaddas_donations_created_total", "Donations created")?;
        let donations_confirmed = IntCounter::new("muqaddas_donations_confirmed_total", "Donations confirmed")?;
        let deposits = IntCounter::new("muqaddas_deposits_total", "Wallet deposits")?;
        let gifts_sent = IntCounter::new("muqaddas_gifts_sent_total", "Gifts sent")?;
        let vip_renewals = IntCounter::new("muqaddas_vip_renewals_total", "VIP subscriptions auto-renewed")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(donations_created.clone()))?;
        registry.register(Box::new(donations_confirmed.clone()))?;
        registry.register(Box::new(deposits.clone()))?;
        registry.register(Box::new(gifts_sent.clone()))?;
        registry.register(Box::new(vip_renewals.clone()))?;

        Ok(Self {
            registry,
            requests,
            donations_created,
            donations_confirmed,
            deposits,
            gifts_sent,
            vip_renewals,
        })
    }

    pub fn hit(&self, area: &str) {
        self.requests.with_label_values(&[area]).inc();
    }

    pub fn render(&self) -> ApiResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| ApiError::Internal(format!("encode metrics: {e}")))?;
        String::from_utf8(buf).map_err(|e| ApiError::Internal(e.to_string()))
    }
}

/// GET /api/metrics
pub async fn metrics_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
