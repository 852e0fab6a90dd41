mod common;

use axum::http::{Method, StatusCode};
use common::{num, TestApp};
use muqaddas_node::store::trees;
use serde_json::json;

#[tokio::test]
async fn gift_moves_coins_to_stars_with_charity_cut() {
    let app = TestApp::new();
    let (_, sender) = app.register("Laila", "laila@example.com").await;
    let (receiver_id, receiver) = app.register("Mehr", "mehr@example.com").await;

    let (_, catalog) = app.call(Method::GET, "/api/gifts/catalog", None, None).await;
    let total: usize = catalog["gifts"]
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_array().unwrap().len())
        .sum();
    assert_eq!(total, 18);

    let (status, body) = app
        .post(
            "/api/gifts/send",
            &sender,
            json!({ "gift_id": "rose", "receiver_id": receiver_id, "quantity": 2, "message": "Eid Mubarak" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(num(&body["total_cost"]), 20.0);
    assert_eq!(num(&body["charity_contribution"]), 0.4);
    assert_eq!(num(&body["receiver_earned"]), 19.6);

    let (_, w) = app.get("/api/wallet", &sender).await;
    assert_eq!(num(&w["coins_balance"]), 980.0);
    let (_, w) = app.get("/api/wallet", &receiver).await;
    assert_eq!(num(&w["stars_balance"]), 19.6);

    let (_, got) = app.get("/api/gifts/received", &receiver).await;
    assert_eq!(got["gifts"][0]["gift_id"], "rose");
    assert_eq!(got["gifts"][0]["sender"]["name"], "Laila");

    let (_, sent) = app.get("/api/gifts/sent", &sender).await;
    assert_eq!(sent["gifts"].as_array().unwrap().len(), 1);

    let (_, notes) = app.get("/api/notifications?unread_only=true", &receiver).await;
    assert_eq!(notes["unread_count"], 2);

    let (_, board) = app.call(Method::GET, "/api/charity/leaderboard", None, None).await;
    assert_eq!(board["leaderboard"][0]["user"]["name"], "Laila");
}

#[tokio::test]
async fn gift_errors() {
    let app = TestApp::new();
    let (sender_id, sender) = app.register("Nadia", "nadia@example.com").await;
    let (receiver_id, _) = app.register("Omar", "omar@example.com").await;

    let (status, body) = app
        .post("/api/gifts/send", &sender, json!({ "gift_id": "rose", "receiver_id": sender_id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Cannot send gift to yourself");

    let (status, _) = app
        .post("/api/gifts/send", &sender, json!({ "gift_id": "unicorn", "receiver_id": receiver_id }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/gifts/send", &sender, json!({ "gift_id": "rose", "receiver_id": "nobody" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/gifts/send", &sender, json!({ "gift_id": "rose", "receiver_id": receiver_id, "quantity": 100 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn referral_commission_on_deposit() {
    let app = TestApp::new();
    let (_, agent) = app.register("Parveen", "parveen@example.com").await;
    let (_, friend) = app.register("Qasim", "qasim@example.com").await;

    let (_, status) = app.get("/api/agency/status", &agent).await;
    let code = status["referral_code"].as_str().unwrap().to_string();
    assert!(code.starts_with("MN"));
    assert_eq!(status["level_info"]["name"], "Member");

    let (status, body) = app.post("/api/agency/apply-referral", &agent, json!({ "referral_code": code })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Cannot use your own referral code");

    let (status, _) = app
        .post("/api/agency/apply-referral", &friend, json!({ "referral_code": "MNNOPE000" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/agency/apply-referral", &friend, json!({ "referral_code": code.to_lowercase() }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.post("/api/agency/apply-referral", &friend, json!({ "referral_code": code })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "You already have a referrer");

    let (_, body) = app.post("/api/wallet/deposit", &friend, json!({ "amount": 600 })).await;
    assert_eq!(num(&body["referral_commission"]), 72.0);

    let (_, w) = app.get("/api/wallet", &agent).await;
    assert_eq!(num(&w["coins_balance"]), 1072.0);
    let (_, status) = app.get("/api/agency/status", &agent).await;
    assert_eq!(status["agency_level"], 1);
    assert_eq!(status["total_referrals"], 1);
    assert_eq!(status["referrals"].as_array().unwrap().len(), 1);
    assert_eq!(num(&status["referrals"][0]["commission_earned"]), 72.0);
    let (_, list) = app.get("/api/agency/commissions", &agent).await;
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn failed_commission_does_not_fail_the_deposit() {
    let app = TestApp::new();
    let (agent_id, agent) = app.register("Tahir", "tahir@example.com").await;
    let (_, friend) = app.register("Uzma", "uzma@example.com").await;
    let (_, status) = app.get("/api/agency/status", &agent).await;
    let code = status["referral_code"].as_str().unwrap().to_string();
    let (status, _) = app.post("/api/agency/apply-referral", &friend, json!({ "referral_code": code })).await;
    assert_eq!(status, StatusCode::OK);

    // referrer's wallet is gone, so crediting the commission aborts
    assert!(app.state.store.remove(trees::WALLETS, &agent_id).unwrap());

    let (status, body) = app.post("/api/wallet/deposit", &friend, json!({ "amount": 600 })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["referral_commission"].is_null());
    assert_eq!(num(&body["wallet"]["coins_balance"]), 1600.0);
    assert_eq!(body["eligible_vip_level"], 1);

    let (_, txs) = app.get("/api/wallet/transactions?transaction_type=deposit", &friend).await;
    assert_eq!(txs["total"], 1);
    let (_, agency) = app.get("/api/agency/status", &agent).await;
    assert_eq!(num(&agency["monthly_volume"]), 0.0);
}

#[tokio::test]
async fn stars_convert_with_fee() {
    let app = TestApp::new();
    let (_, sender) = app.register("Rabia", "rabia@example.com").await;
    let (receiver_id, receiver) = app.register("Sana", "sana@example.com").await;
    app.post("/api/gifts/send", &sender, json!({ "gift_id": "rose", "receiver_id": receiver_id, "quantity": 5 }))
        .await;

    let (status, body) = app.post("/api/agency/convert-stars", &receiver, json!({ "stars_amount": 49 })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(num(&body["fee_amount"]), 3.92);
    assert_eq!(num(&body["coins_received"]), 45.08);

    let (status, body) = app.post("/api/agency/convert-stars", &receiver, json!({ "stars_amount": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Insufficient stars balance");
}
