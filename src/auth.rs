//! Users, credentials and sessions.
//!
//! A session token is accepted from the `session_token` cookie first and
//! then from an `Authorization: Bearer` header. Tokens issued by the external
//! OAuth provider are stored as-is; password logins mint our own.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use axum_extra::extract::{
    cookie::{Cookie, CookieJar},
    WithRejection,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::{DateTime, Utc};
use hmac::Hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use sled::Transactional;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult, JsonBody};
use crate::notifications::{self, NotificationKind};
use crate::state::AppState;
use crate::store::{abort, flatten, new_id, trees, tx_put};
use crate::vip::UserVipStatus;
use crate::wallet::Wallet;

pub const SESSION_COOKIE: &str = "session_token";
const PASSWORD_ROUNDS: u32 = 100_000;
const MIN_PASSWORD_LEN: usize = 8;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// PBKDF2-HMAC-SHA256 password record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    salt: String,
    hash: String,
    rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// --- password hashing ---

fn derive_key(password: &str, salt: &[u8], rounds: u32) -> ApiResult<[u8; 32]> {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, rounds, &mut out)
        .map_err(|e| ApiError::Internal(format!("pbkdf2: {e}")))?;
    Ok(out)
}

fn hash_password(password: &str) -> ApiResult<Credentials> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash = derive_key(password, &salt, PASSWORD_ROUNDS)?;
    Ok(Credentials {
        salt: hex::encode(salt),
        hash: hex::encode(hash),
        rounds: PASSWORD_ROUNDS,
    })
}

fn verify_password(password: &str, creds: &Credentials) -> ApiResult<bool> {
    let (Ok(salt), Ok(expected)) = (hex::decode(&creds.salt), hex::decode(&creds.hash)) else {
        return Err(ApiError::Internal("malformed credentials".into()));
    };
    if creds.rounds == 0 {
        return Ok(false);
    }
    let got = derive_key(password, &salt, creds.rounds)?;
    Ok(got.as_slice().ct_eq(&expected).into())
}

/// Run CPU-heavy work such as key derivation off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task: {e}")))?
}

fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

// --- user lookups and provisioning ---

pub fn find_user(state: &AppState, user_id: &str) -> ApiResult<Option<User>> {
    state.store.get(trees::USERS, user_id)
}

pub fn find_user_by_email(state: &AppState, email: &str) -> ApiResult<Option<User>> {
    let Some(user_id) = state
        .store
        .get::<String>(trees::USERS_BY_EMAIL, normalize_email(email))?
    else {
        return Ok(None);
    };
    find_user(state, &user_id)
}

/// Create a user together with the wallet, VIP status, optional password
/// and welcome notification every account starts with. The account records
/// are written in one transaction; fails with 409 if the email is already
/// registered.
pub fn provision_user(
    state: &AppState,
    email: &str,
    name: &str,
    phone: Option<String>,
    picture: Option<String>,
    creds: Option<Credentials>,
    now: DateTime<Utc>,
) -> ApiResult<User> {
    let email = normalize_email(email);
    let user = User {
        user_id: new_id("user"),
        email: email.clone(),
        name: name.trim().to_string(),
        phone,
        picture,
        created_at: now,
    };
    let s = &state.settings;
    let wallet = Wallet::new(&user.user_id, s.welcome_coins, s.welcome_bonus, now);
    let vip = UserVipStatus::new(&user.user_id, now);

    let by_email = state.store.tree(trees::USERS_BY_EMAIL)?;
    let users = state.store.tree(trees::USERS)?;
    let wallets = state.store.tree(trees::WALLETS)?;
    let statuses = state.store.tree(trees::VIP_STATUS)?;
    let credentials = state.store.tree(trees::CREDENTIALS)?;
    let key = user.user_id.as_bytes();
    (&by_email, &users, &wallets, &statuses, &credentials)
        .transaction(|(et, ut, wt, vt, ct)| {
            if et.get(email.as_bytes())?.is_some() {
                return abort(ApiError::Conflict("Email already registered".into()));
            }
            tx_put(et, email.as_bytes(), &user.user_id)?;
            tx_put(ut, key, &user)?;
            tx_put(wt, key, &wallet)?;
            tx_put(vt, key, &vip)?;
            if let Some(c) = &creds {
                tx_put(ct, key, c)?;
            }
            Ok(())
        })
        .map_err(flatten)?;

    if let Err(e) = notifications::notify(
        &state.store,
        &user.user_id,
        NotificationKind::Welcome,
        "Welcome to VIP Club! 🎉",
        &format!(
            "You've received {} coins and {} bonus as a welcome gift!",
            s.welcome_coins, s.welcome_bonus
        ),
        Some("/wallet"),
        now,
    ) {
        warn!(user_id = %user.user_id, error = %e, "welcome notification failed");
    }

    info!(user_id = %user.user_id, "provisioned new user");
    Ok(user)
}

pub fn start_session(state: &AppState, user_id: &str, token: String, now: DateTime<Utc>) -> ApiResult<Session> {
    let session = Session {
        user_id: user_id.to_string(),
        session_token: token,
        expires_at: now + state.settings.session_ttl,
        created_at: now,
    };
    state.store.put(trees::SESSIONS, &session.session_token, &session)?;
    Ok(session)
}

/// Resolve a token to its user, enforcing expiry.
pub fn authenticate(state: &AppState, token: &str, now: DateTime<Utc>) -> ApiResult<User> {
    let Some(session) = state.store.get::<Session>(trees::SESSIONS, token)? else {
        return Err(ApiError::Unauthorized("Invalid session"));
    };
    if session.expires_at < now {
        state.store.remove(trees::SESSIONS, token)?;
        return Err(ApiError::Unauthorized("Session expired"));
    }
    find_user(state, &session.user_id)?.ok_or(ApiError::Unauthorized("User not found"))
}

fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(c) = jar.get(SESSION_COOKIE) {
        if !c.value().is_empty() {
            return Some(c.value().to_string());
        }
    }
    parts
        .headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Extractor for routes that require a signed-in user.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or(ApiError::Unauthorized("Not authenticated"))?;
        authenticate(state, &token, Utc::now()).map(CurrentUser)
    }
}

/// Extractor for routes that personalise output when signed in.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            return Ok(MaybeUser(None));
        };
        match authenticate(state, &token, Utc::now()) {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(ApiError::Unauthorized(_)) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

/// Guard for operator endpoints: `X-Admin-Token` must match the configured
/// token, and admin routes are closed when none is configured.
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.settings.admin_token.as_deref() else {
            warn!("[SECURITY] admin token not configured");
            return Err(ApiError::Forbidden("Admin access disabled"));
        };
        let got = parts
            .headers
            .get("X-Admin-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !bool::from(got.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(ApiError::Unauthorized("admin token required"));
        }
        Ok(AdminAuth)
    }
}

fn session_cookie(state: &AppState, token: &str) -> ApiResult<Cookie<'static>> {
    let max_age = state.settings.session_ttl.num_seconds();
    let secure = if state.settings.cookie_secure {
        "; Secure; SameSite=None"
    } else {
        "; SameSite=Lax"
    };
    Cookie::parse(format!(
        "{SESSION_COOKIE}={token}; Max-Age={max_age}; Path=/; HttpOnly{secure}"
    ))
    .map_err(|e| ApiError::Internal(format!("build cookie: {e}")))
}

// --- DTOs ---

#[derive(Debug, Deserialize)]
pub struct RegisterReq {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionExchangeReq {
    pub session_id: Option<String>,
}

/// Payload returned by the OAuth provider's session-data endpoint.
#[derive(Debug, Deserialize)]
pub struct SessionData {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResp {
    pub success: bool,
    pub user: User,
    pub access_token: String,
    pub token_type: &'static str,
}

fn signed_in(state: &AppState, jar: CookieJar, user: User, session: Session) -> ApiResult<(CookieJar, Json<AuthResp>)> {
    let jar = jar.add(session_cookie(state, &session.session_token)?);
    Ok((
        jar,
        Json(AuthResp {
            success: true,
            user,
            access_token: session.session_token,
            token_type: "bearer",
        }),
    ))
}

// --- Routes ---

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): JsonBody<RegisterReq>,
) -> ApiResult<(CookieJar, Json<AuthResp>)> {
    state.metrics.hit("auth");
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if !is_plausible_email(&req.email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let now = Utc::now();
    let password = req.password;
    let creds = blocking(move || hash_password(&password)).await?;
    let phone = req.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    let user = provision_user(&state, &req.email, &req.name, phone, None, Some(creds), now)?;

    let session = start_session(&state, &user.user_id, new_session_token(), now)?;
    signed_in(&state, jar, user, session)
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): JsonBody<LoginReq>,
) -> ApiResult<(CookieJar, Json<AuthResp>)> {
    state.metrics.hit("auth");
    let bad = ApiError::Unauthorized("Invalid email or password");
    let Some(user) = find_user_by_email(&state, &req.email)? else {
        return Err(bad);
    };
    let Some(creds) = state.store.get::<Credentials>(trees::CREDENTIALS, &user.user_id)? else {
        // OAuth-only account
        return Err(bad);
    };
    let password = req.password;
    if !blocking(move || verify_password(&password, &creds)).await? {
        warn!(user_id = %user.user_id, "failed login");
        return Err(bad);
    }

    let session = start_session(&state, &user.user_id, new_session_token(), Utc::now())?;
    info!(user_id = %user.user_id, "user logged in");
    signed_in(&state, jar, user, session)
}

/// POST /api/auth/session
///
/// Exchanges a one-time `session_id` from the OAuth provider for the
/// provider's session token and signs the matching user in, creating the
/// account on first sight.
pub async fn exchange_session(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): JsonBody<SessionExchangeReq>,
) -> ApiResult<(CookieJar, Json<AuthResp>)> {
    state.metrics.hit("auth");
    let Some(session_id) = req.session_id.filter(|s| !s.is_empty()) else {
        return Err(ApiError::bad_request("session_id required"));
    };

    let resp = state
        .http
        .get(&state.settings.oauth_session_url)
        .header("X-Session-ID", &session_id)
        .send()
        .await
        .map_err(|e| {
            warn!("Auth request failed: {e}");
            ApiError::Upstream(e.to_string())
        })?;
    if !resp.status().is_success() {
        return Err(ApiError::Unauthorized("Invalid session_id"));
    }
    let data: SessionData = resp
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("session data: {e}")))?;

    let now = Utc::now();
    let user = match find_user_by_email(&state, &data.email)? {
        Some(u) => u,
        None => provision_user(&state, &data.email, &data.name, None, data.picture.clone(), None, now)?,
    };
    let session = start_session(&state, &user.user_id, data.session_token, now)?;
    signed_in(&state, jar, user, session)
}

/// GET /api/auth/me
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar, parts: LogoutToken) -> ApiResult<(CookieJar, Json<Value>)> {
    if let Some(token) = parts.0 {
        state.store.remove(trees::SESSIONS, &token)?;
    }
    // expire the cookie even when the request authenticated by header
    let cleared = Cookie::parse(format!("{SESSION_COOKIE}=; Max-Age=0; Path=/; HttpOnly"))
        .map_err(|e| ApiError::Internal(format!("build cookie: {e}")))?;
    let jar = jar.add(cleared);
    Ok((jar, Json(json!({"success": true, "message": "Logged out successfully"}))))
}

/// GET /api/auth/check
pub async fn check(MaybeUser(user): MaybeUser) -> Json<Value> {
    Json(json!({ "authenticated": user.is_some(), "user": user }))
}

/// Session token of the request, if any, without validating it.
pub struct LogoutToken(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for LogoutToken {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(LogoutToken(session_token(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::Store;

    fn state() -> AppState {
        AppState::new(Store::temporary().unwrap(), AppConfig::default().resolved().unwrap()).unwrap()
    }

    #[test]
    fn password_verification() {
        let creds = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &creds).unwrap());
        assert!(!verify_password("wrong horse", &creds).unwrap());
        assert_eq!(creds.rounds, PASSWORD_ROUNDS);

        let other = hash_password("correct horse").unwrap();
        assert_ne!(other.salt, creds.salt);
        assert_ne!(other.hash, creds.hash);
    }

    #[test]
    fn duplicate_registration_writes_nothing() {
        let st = state();
        let now = Utc::now();
        let creds = hash_password("correct horse").unwrap();
        let user = provision_user(&st, "sana@example.com", "Sana", None, None, Some(creds.clone()), now).unwrap();
        assert!(st.store.contains(trees::CREDENTIALS, &user.user_id).unwrap());
        assert!(st.store.contains(trees::VIP_STATUS, &user.user_id).unwrap());

        let dup = provision_user(&st, "SANA@example.com", "Sana 2", None, None, Some(creds), now).unwrap_err();
        assert!(matches!(dup, ApiError::Conflict(_)));
        for tree in [trees::USERS, trees::WALLETS, trees::VIP_STATUS, trees::CREDENTIALS] {
            assert_eq!(st.store.len(tree).unwrap(), 1, "{tree}");
        }
    }

    #[test]
    fn provisioning_creates_wallet_and_rejects_duplicates() {
        let st = state();
        let now = Utc::now();
        let user = provision_user(&st, "Ayesha@Example.com", "Ayesha", None, None, None, now).unwrap();
        assert_eq!(user.email, "ayesha@example.com");

        let wallet: Wallet = st.store.get(trees::WALLETS, &user.user_id).unwrap().unwrap();
        assert_eq!(wallet.coins_balance, st.settings.welcome_coins);
        assert_eq!(wallet.bonus_balance, st.settings.welcome_bonus);

        let dup = provision_user(&st, "ayesha@example.com", "Other", None, None, None, now).unwrap_err();
        assert!(matches!(dup, ApiError::Conflict(_)));
        assert_eq!(
            find_user_by_email(&st, " AYESHA@example.com").unwrap().unwrap().user_id,
            user.user_id
        );
    }

    #[test]
    fn expired_sessions_are_rejected_and_removed() {
        let st = state();
        let now = Utc::now();
        let user = provision_user(&st, "a@b.co", "A", None, None, None, now).unwrap();
        let s = start_session(&st, &user.user_id, "tok".into(), now - chrono::Duration::days(8)).unwrap();

        let err = authenticate(&st, &s.session_token, now).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized("Session expired")));
        assert!(!st.store.contains(trees::SESSIONS, "tok").unwrap());

        let fresh = start_session(&st, &user.user_id, "tok2".into(), now).unwrap();
        assert_eq!(authenticate(&st, &fresh.session_token, now).unwrap().user_id, user.user_id);
    }

    #[test]
    fn email_shape() {
        assert!(is_plausible_email("test@muqaddas.com"));
        assert!(!is_plausible_email("nope"));
        assert!(!is_plausible_email("@x.com"));
        assert!(!is_plausible_email("a@localhost"));
    }
}
