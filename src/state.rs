use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};
use crate::metrics::Metrics;
use crate::store::Store;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub settings: Arc<Settings>,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(store: Store, settings: Settings) -> ApiResult<Self> {
        // Global client with a sensible default timeout to avoid long-hanging requests.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .build()
            .map_err(|e| ApiError::Internal(format!("build http client: {e}")))?;
        let metrics = Metrics::new().map_err(|e| ApiError::Internal(format!("register metrics: {e}")))?;
        Ok(Self {
            store,
            settings: Arc::new(settings),
            metrics: Arc::new(metrics),
            http,
        })
    }
}
