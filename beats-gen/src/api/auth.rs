//! Account registration, login sessions and the session middleware
//!
//! Clients log in with username and password and receive an opaque bearer
//! token. Only the token's SHA-256 is stored. Failed logins are counted per
//! username through the [`RateLimitStore`](crate::stores::RateLimitStore);
//! once the limit is hit, further attempts get 429 until the window resets.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use beats_common::security::{generate_session_token, hash_password, hash_token, verify_password};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::stores::RateDecision;
use crate::AppState;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 256;

/// Authenticated caller, inserted into request extensions by [`require_session`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    #[serde(skip)]
    pub token_hash: String,
}

/// Body of register and login requests
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<(StatusCode, Json<AccountResponse>)> {
    let username = credentials.username.trim().to_string();
    validate_username(&username)?;
    validate_password(&credentials.password)?;

    let password = credentials.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("Password hashing task failed: {}", e)))?;

    let user = state.users.create_user(&username, &password_hash).await?;

    info!(user_id = %user.id, username = %user.username, "Registered account");

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Json<LoginResponse>> {
    let username = credentials.username.trim().to_string();
    let limit_key = format!("login:{}", username.to_ascii_lowercase());
    let policy = state.policy.login_limit;
    let now = Utc::now();

    if let RateDecision::Limited { retry_after } =
        state.rate_limits.check(&limit_key, policy, now).await?
    {
        warn!(username = %username, "Login rejected: too many failed attempts");
        return Err(ApiError::TooManyRequests {
            message: "Too many failed login attempts, try again later".to_string(),
            retry_after,
        });
    }

    let user = state.users.find_by_username(&username).await?;

    let verified = match &user {
        Some(user) => {
            let password = credentials.password;
            let encoded = user.password_hash.clone();
            tokio::task::spawn_blocking(move || verify_password(&password, &encoded))
                .await
                .map_err(|e| ApiError::Internal(format!("Password check task failed: {}", e)))?
        }
        None => false,
    };

    let user = match user {
        Some(user) if verified => user,
        _ => {
            let decision = state.rate_limits.record(&limit_key, policy, now).await?;
            warn!(
                username = %username,
                limited = decision.is_limited(),
                "Failed login attempt"
            );
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }
    };

    state.rate_limits.reset(&limit_key).await?;

    let token = generate_session_token();
    let expires_at = now + state.policy.session_ttl;
    state
        .users
        .create_session(user.id, &hash_token(&token), expires_at)
        .await?;

    info!(user_id = %user.id, "Login succeeded");

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        expires_at,
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    state.users.revoke_session(&user.token_hash).await?;
    info!(user_id = %user.user_id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<AuthUser> {
    Json(user)
}

/// Session middleware
///
/// Resolves `Authorization: Bearer <token>` to an [`AuthUser`] and stores it
/// in the request extensions. Missing, unknown and expired tokens are 401.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token_hash = bearer_token(request.headers())
        .map(hash_token)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let user = state
        .users
        .resolve_session(&token_hash, Utc::now())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".to_string()))?;

    request.extensions_mut().insert(AuthUser {
        user_id: user.id,
        username: user.username,
        token_hash,
    });

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn validate_username(username: &str) -> ApiResult<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ApiError::BadRequest(format!(
            "Username must be {} to {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ApiError::BadRequest(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> ApiResult<()> {
    let len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(ApiError::BadRequest(format!(
            "Password must be {} to {} characters",
            PASSWORD_MIN, PASSWORD_MAX
        )));
    }
    Ok(())
}

/// Public account routes (no session required)
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

/// Session routes (mounted behind [`require_session`])
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}
