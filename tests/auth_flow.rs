mod common;

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use common::{read_json, session_cookie, TestApp};
use serde_json::json;

/// Stand-in for the OAuth provider's session-data endpoint. Only the
/// `good-session` id is accepted.
async fn spawn_session_provider() -> String {
    let app = Router::new().route(
        "/session-data",
        get(|headers: HeaderMap| async move {
            match headers.get("X-Session-ID").and_then(|v| v.to_str().ok()) {
                Some("good-session") => Json(json!({
                    "id": "provider-user-1",
                    "email": "Hina@Example.com",
                    "name": "Hina",
                    "picture": "https://example.com/hina.png",
                    "session_token": "provider-token-abc",
                }))
                .into_response(),
                _ => StatusCode::UNAUTHORIZED.into_response(),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/session-data")
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_cookie(method: Method, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Cookie", format!("session_token={token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn root_and_health_are_public() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/api/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");

    let (status, body) = app.call(Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["users"], 0);
}

#[tokio::test]
async fn register_login_logout() {
    let app = TestApp::new();
    let (user_id, token) = app.register("Ayesha", "ayesha@example.com").await;

    let (status, me) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user_id"], user_id.as_str());
    assert_eq!(me["email"], "ayesha@example.com");

    let (_, check) = app.get("/api/auth/check", &token).await;
    assert_eq!(check["authenticated"], true);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "Again", "email": "ayesha@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], "Email already registered");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ayesha@example.com", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ayesha@example.com", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let second = body["access_token"].as_str().unwrap().to_string();
    assert_ne!(second, token);

    let (status, _) = app.call(Method::POST, "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.get("/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].is_string());

    // other sessions survive
    let (status, _) = app.get("/api/auth/me", &second).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rejects_weak_registration() {
    let app = TestApp::new();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "Short", "email": "short@example.com", "password": "abc" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Password must be at least 8 characters");

    let (status, _) = app.call(Method::GET, "/api/wallet", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn welcome_notification_can_be_read() {
    let app = TestApp::new();
    let (_, token) = app.register("Bilal", "bilal@example.com").await;

    let (_, body) = app.get("/api/notifications", &token).await;
    assert_eq!(body["unread_count"], 1);
    let id = body["notifications"][0]["notification_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(Method::POST, &format!("/api/notifications/{id}/read"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get("/api/notifications", &token).await;
    assert_eq!(body["unread_count"], 0);
}

#[tokio::test]
async fn session_cookie_authenticates_without_bearer() {
    let app = TestApp::new();
    let resp = app
        .send(json_request(
            Method::POST,
            "/api/auth/register",
            json!({ "name": "Iqra", "email": "iqra@example.com", "password": "correct horse" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = session_cookie(&resp).expect("session cookie set");
    let set = resp.headers().get("set-cookie").unwrap().to_str().unwrap().to_string();
    assert!(set.contains("HttpOnly"), "{set}");
    let (_, body) = read_json(resp).await;
    assert_eq!(body["access_token"], cookie.as_str());

    let (status, me) = read_json(app.send(with_cookie(Method::GET, "/api/auth/me", &cookie)).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "iqra@example.com");

    let resp = app.send(with_cookie(Method::POST, "/api/auth/logout", &cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(session_cookie(&resp).as_deref(), Some(""));
    let set = resp.headers().get("set-cookie").unwrap().to_str().unwrap().to_string();
    assert!(set.contains("Max-Age=0"), "{set}");

    let (status, _) = read_json(app.send(with_cookie(Method::GET, "/api/auth/me", &cookie)).await).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oauth_session_exchange_provisions_once() {
    let provider = spawn_session_provider().await;
    let app = TestApp::with_settings(|s| s.oauth_session_url = provider);

    let (status, body) = app
        .call(Method::POST, "/api/auth/session", None, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "session_id required");

    let (status, body) = app
        .call(Method::POST, "/api/auth/session", None, Some(json!({ "session_id": "forged" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid session_id");

    let resp = app
        .send(json_request(Method::POST, "/api/auth/session", json!({ "session_id": "good-session" })))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(session_cookie(&resp).as_deref(), Some("provider-token-abc"));
    let (_, body) = read_json(resp).await;
    assert_eq!(body["user"]["email"], "hina@example.com");
    assert_eq!(body["user"]["picture"], "https://example.com/hina.png");
    let user_id = body["user"]["user_id"].as_str().unwrap().to_string();

    // the provider's token is the session
    let (status, me) = read_json(app.send(with_cookie(Method::GET, "/api/auth/me", "provider-token-abc")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user_id"], user_id.as_str());
    let (_, w) = app.get("/api/wallet", "provider-token-abc").await;
    assert_eq!(common::num(&w["coins_balance"]), 1000.0);

    // second sign-in reuses the account
    let (status, body) = app
        .call(Method::POST, "/api/auth/session", None, Some(json!({ "session_id": "good-session" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["user_id"], user_id.as_str());

    // OAuth-only accounts have no password
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "hina@example.com", "password": "anything at all" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_use_the_detail_envelope() {
    let app = TestApp::new();
    let (_, token) = app.register("Jamal", "jamal@example.com").await;

    let (status, body) = app.post_raw("/api/wallet/deposit", &token, "{").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string(), "{body}");

    let (status, body) = app.post_raw("/api/wallet/deposit", &token, r#"{"amount": "lots"}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("amount"), "{body}");

    let (status, body) = app.post_raw("/api/wallet/deposit", &token, r#"{"amount": 1e300}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string(), "{body}");
}

#[tokio::test]
async fn cors_allows_credentials_for_listed_origins() {
    let app = TestApp::with_settings(|s| s.cors_origins = vec!["http://localhost:3000".to_string()]);
    let preflight = |origin: &str| {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/wallet")
            .header("Origin", origin)
            .header("Access-Control-Request-Method", "POST")
            .header("Access-Control-Request-Headers", "content-type")
            .body(Body::empty())
            .unwrap()
    };

    let resp = app.send(preflight("http://localhost:3000")).await;
    let headers = resp.headers();
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "http://localhost:3000");
    assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");

    let resp = app.send(preflight("https://evil.example")).await;
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}
