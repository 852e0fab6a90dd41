mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{num, TestApp, ADMIN_TOKEN};
use muqaddas_node::{store::trees, vip::UserVipStatus};
use serde_json::json;

/// Move a subscription's end into the past so the next sweep settles it.
fn lapse(app: &TestApp, user_id: &str) {
    app.state
        .store
        .update(trees::VIP_STATUS, user_id, "missing", |s: &mut UserVipStatus| {
            s.subscription_end = Some(Utc::now() - Duration::minutes(1));
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn new_account_gets_welcome_balances() {
    let app = TestApp::new();
    let (_, token) = app.register("Chand", "chand@example.com").await;
    let (status, w) = app.get("/api/wallet", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&w["coins_balance"]), 1000.0);
    assert_eq!(num(&w["bonus_balance"]), 100.0);
    assert_eq!(num(&w["stars_balance"]), 0.0);
}

#[tokio::test]
async fn deposit_subscribe_and_history() {
    let app = TestApp::new();
    let (_, token) = app.register("Dua", "dua@example.com").await;

    let (status, body) = app.post("/api/wallet/deposit", &token, json!({ "amount": 600 })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(num(&body["wallet"]["coins_balance"]), 1600.0);
    assert_eq!(body["eligible_vip_level"], 1);
    assert!(body["referral_commission"].is_null());

    let (status, body) = app.post("/api/vip/subscribe", &token, json!({ "level": 3 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Need to recharge 5000 to unlock this level");

    let (status, body) = app.post("/api/vip/subscribe", &token, json!({ "level": 9 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Invalid VIP level");

    let (status, body) = app.post("/api/vip/subscribe", &token, json!({ "level": 1 })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["vip_status"]["vip_level"], 1);

    let (_, w) = app.get("/api/wallet", &token).await;
    assert_eq!(num(&w["coins_balance"]), 1501.0);

    let (_, status) = app.get("/api/vip/status", &token).await;
    assert_eq!(status["vip_level"], 1);
    assert_eq!(status["is_active"], true);
    assert_eq!(status["current_level_data"]["name"], "Bronze");

    let (_, txs) = app.get("/api/wallet/transactions", &token).await;
    let kinds: Vec<&str> = txs["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["transaction_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&"vip_subscription"));
    assert!(kinds.contains(&"deposit"));

    let (_, only) = app.get("/api/wallet/transactions?transaction_type=deposit", &token).await;
    assert_eq!(only["total"], 1);
}

#[tokio::test]
async fn deposit_and_transfer_validation() {
    let app = TestApp::new();
    let (_, token) = app.register("Eman", "eman@example.com").await;

    let (status, body) = app.post("/api/wallet/deposit", &token, json!({ "amount": -5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Amount must be positive");

    let (status, body) = app.post("/api/wallet/deposit", &token, json!({ "amount": 100001 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Maximum deposit is 100000");

    let (status, body) = app
        .post(
            "/api/wallet/transfer",
            &token,
            json!({ "amount": 10, "from_balance": "coins", "to_balance": "coins" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Cannot transfer to the same balance");

    let (status, _) = app
        .post(
            "/api/wallet/transfer",
            &token,
            json!({ "amount": 50, "from_balance": "bonus", "to_balance": "coins_balance" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, w) = app.get("/api/wallet", &token).await;
    assert_eq!(num(&w["coins_balance"]), 1050.0);
    assert_eq!(num(&w["bonus_balance"]), 50.0);

    let (status, body) = app.post("/api/wallet/withdraw", &token, json!({ "amount": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Insufficient withdrawable balance");
}

#[tokio::test]
async fn vip_cancel_keeps_level_and_sweep_needs_admin() {
    let app = TestApp::new();
    let (_, token) = app.register("Faiz", "faiz@example.com").await;
    app.post("/api/wallet/deposit", &token, json!({ "amount": 500 })).await;
    let (status, _) = app.post("/api/vip/subscribe", &token, json!({ "level": 1 })).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.post("/api/vip/toggle-auto-renew", &token, json!({})).await;
    assert_eq!(body["auto_renew"], false);
    let (status, _) = app.post("/api/vip/cancel", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, st) = app.get("/api/vip/status", &token).await;
    assert_eq!(st["vip_level"], 1);
    assert_eq!(st["auto_renew"], false);

    let (status, _) = app.call(Method::POST, "/api/admin/vip/sweep", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = app
        .call_with(Method::POST, "/api/admin/vip/sweep", None, &[("X-Admin-Token", "test-admix")], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "admin token required");
    let (status, report) = app
        .call_with(Method::POST, "/api/admin/vip/sweep", None, &[("X-Admin-Token", ADMIN_TOKEN)], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    // nothing has expired yet
    assert_eq!(report, json!({ "renewed": 0, "expired": 0 }));
}

#[tokio::test]
async fn admin_sweep_renews_and_expires() {
    let app = TestApp::new();
    let (renewer, renew_token) = app.register("Hamza", "hamza@example.com").await;
    let (leaver, leave_token) = app.register("Iman", "iman@example.com").await;
    for token in [&renew_token, &leave_token] {
        app.post("/api/wallet/deposit", token, json!({ "amount": 500 })).await;
        let (status, _) = app.post("/api/vip/subscribe", token, json!({ "level": 1 })).await;
        assert_eq!(status, StatusCode::OK);
    }
    app.post("/api/vip/cancel", &leave_token, json!({})).await;
    lapse(&app, &renewer);
    lapse(&app, &leaver);

    let (status, report) = app
        .call_with(Method::POST, "/api/admin/vip/sweep", None, &[("X-Admin-Token", ADMIN_TOKEN)], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report, json!({ "renewed": 1, "expired": 1 }));

    let (_, st) = app.get("/api/vip/status", &renew_token).await;
    assert_eq!(st["is_active"], true);
    assert!(st["days_remaining"].as_i64().unwrap() >= 29);
    let (_, w) = app.get("/api/wallet", &renew_token).await;
    assert_eq!(num(&w["coins_balance"]), 1302.0);
    let (_, renewals) = app
        .get("/api/wallet/transactions?transaction_type=vip_renewal", &renew_token)
        .await;
    assert_eq!(renewals["total"], 1);

    let (_, st) = app.get("/api/vip/status", &leave_token).await;
    assert_eq!(st["is_active"], false);
    let (_, w) = app.get("/api/wallet", &leave_token).await;
    assert_eq!(num(&w["coins_balance"]), 1401.0);
    let (_, notes) = app.get("/api/notifications", &leave_token).await;
    let titles: Vec<&str> = notes["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"VIP Bronze Expired"), "{titles:?}");

    // settled subscriptions are not picked up again
    let (_, report) = app
        .call_with(Method::POST, "/api/admin/vip/sweep", None, &[("X-Admin-Token", ADMIN_TOKEN)], None)
        .await;
    assert_eq!(report, json!({ "renewed": 0, "expired": 0 }));
}

#[tokio::test]
async fn metrics_count_requests() {
    let app = TestApp::new();
    let (_, token) = app.register("Gul", "gul@example.com").await;
    app.post("/api/wallet/deposit", &token, json!({ "amount": 10 })).await;
    let (status, body) = app.call(Method::GET, "/api/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("muqaddas_deposits_total 1"), "{text}");
}
