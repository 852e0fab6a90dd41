//! Router assembly.
//!
//! Every endpoint lives under `/api`. Handlers stay in their domain modules;
//! this file only wires paths to them and applies the global layers.

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE},
        HeaderName, HeaderValue, Method,
    },
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::state::AppState;
use crate::{
    agency, auth, charity, donations, education, games, gifts, health, metrics, notifications, rewards, vip,
    wallet, withdrawal,
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);
    Router::new()
        // nest() serves `/api` but not `/api/`
        .route("/api/", get(health::root))
        .nest("/api", api_routes())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics_handler))
        // auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/session", post(auth::exchange_session))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/check", get(auth::check))
        // wallet
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::transactions))
        .route("/wallet/deposit", post(wallet::deposit))
        .route("/wallet/withdraw", post(wallet::withdraw))
        .route("/wallet/transfer", post(wallet::transfer))
        // vip
        .route("/vip/levels", get(vip::levels))
        .route("/vip/status", get(vip::status))
        .route("/vip/subscribe", post(vip::subscribe))
        .route("/vip/toggle-auto-renew", post(vip::toggle_auto_renew))
        .route("/vip/cancel", post(vip::cancel))
        .route("/admin/vip/sweep", post(vip::sweep_now))
        // donations
        .route("/donations", post(donations::create_donation).get(donations::my_donations))
        .route("/donations/all", get(donations::public_feed))
        .route("/donations/:donation_id/confirm", put(donations::confirm_donation))
        .route("/stats", get(donations::stats))
        .route("/stats/public", get(donations::public_stats))
        .route("/family-equity", get(donations::family_equity))
        // notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/read-all", post(notifications::read_all))
        .route("/notifications/:notification_id/read", post(notifications::read_one))
        // rewards
        .route("/rewards/activity-status", get(rewards::activity_status))
        .route("/rewards/track-activity", post(rewards::track_activity))
        .route("/rewards/claim-activity-reward", post(rewards::claim_activity_reward))
        .route("/rewards/daily-summary", get(rewards::daily_summary))
        .route("/messages/reward", post(rewards::claim_message_reward))
        .route("/messages/reward-status", get(rewards::message_reward_status))
        // agency
        .route("/agency/status", get(agency::status))
        .route("/agency/apply-referral", post(agency::apply_referral))
        .route("/agency/convert-stars", post(agency::convert_stars))
        .route("/agency/commissions", get(agency::commissions))
        // withdrawal
        .route("/withdrawal/config", get(withdrawal::config))
        .route("/withdrawal/save-payment-method", post(withdrawal::save_payment_method))
        .route("/withdrawal/request", post(withdrawal::create_request))
        .route("/withdrawal/history", get(withdrawal::history))
        .route("/withdrawal/:withdrawal_id/verify-face", post(withdrawal::verify_face_handler))
        // charity
        .route("/charity/stats", get(charity::stats))
        .route("/charity/leaderboard", get(charity::leaderboard))
        // gifts
        .route("/gifts/catalog", get(gifts::catalog))
        .route("/gifts/send", post(gifts::send))
        .route("/gifts/sent", get(gifts::sent))
        .route("/gifts/received", get(gifts::received))
        .route("/gifts/leaderboard", get(gifts::leaderboard))
        // education
        .route("/education/courses", get(education::courses))
        .route("/education/enroll", post(education::enroll_handler))
        .route("/education/enrollments", get(education::my_enrollments))
        .route("/education/:course_id/progress", post(education::progress))
        // games
        .route("/games", get(games::list))
        .route("/games/spin-status", get(games::spin_status))
        .route("/games/spin", post(games::spin_handler))
}

/// Empty list or `*` allows any origin without credentials. An explicit
/// list also allows credentials so the session cookie rides cross-origin;
/// invalid entries are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let mut list: Vec<HeaderValue> = Vec::new();
    for part in origins.iter().map(|s| s.trim()) {
        match HeaderValue::from_str(part) {
            Ok(hv) => list.push(hv),
            Err(_) => warn!(origin = %part, "ignoring invalid CORS origin"),
        }
    }
    if list.is_empty() {
        // no valid origins -> deny cross-origin
        return CorsLayer::new().allow_methods(Any);
    }
    // credentials cannot be combined with wildcards
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            COOKIE,
            HeaderName::from_static("x-admin-token"),
        ])
        .allow_credentials(true)
}
