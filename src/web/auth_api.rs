//! Auth API endpoints and the session middleware guarding the page routes.

use crate::auth::{self, SESSION_COOKIE, SESSION_DURATION_SECS};
use crate::storage::user_store::{Session, User};
use crate::web::WebState;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::warn;

/// The socket peer address, when the server was started with connect
/// info. Absent under test harnesses that drive the router directly.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordUpdateRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Generic JSON envelope for the auth API.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            error: None,
        }
    }

    fn err(error: &str) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

fn api_error(status: StatusCode, error: &str) -> Response {
    (status, Json(ApiResponse::err(error))).into_response()
}

/// Resolve the client IP: proxy headers first, then the socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.map(|p| p.ip().to_string()).unwrap_or_default()
}

fn session_cookie(session: &Session) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session.id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build()
}

fn clear_session_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"))
}

/// The authenticated user attached to a request by the middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
}

async fn authenticate(
    state: &WebState,
    jar: &CookieJar,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Option<AuthContext> {
    let cookie = jar.get(SESSION_COOKIE)?;
    let ip = client_ip(headers, peer);
    let session = state
        .users
        .validate_session(cookie.value(), &ip)
        .await
        .ok()??;
    let user = state.users.get_user_by_id(session.user_id).await.ok()??;
    Some(AuthContext { user, session })
}

/// Middleware for the page routes: a valid IP-bound session is required,
/// and a pending password change forces a detour to `/password-change`.
pub async fn require_session(
    State(state): State<WebState>,
    jar: CookieJar,
    ClientAddr(peer): ClientAddr,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, &jar, request.headers(), peer).await {
        Some(ctx) => {
            if ctx.user.requires_password_change {
                return Redirect::to("/password-change").into_response();
            }
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        None => (clear_session_cookie(jar), Redirect::to("/login")).into_response(),
    }
}

/// Middleware for `/password-change`: any live session suffices.
pub async fn require_session_any(
    State(state): State<WebState>,
    jar: CookieJar,
    ClientAddr(peer): ClientAddr,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, &jar, request.headers(), peer).await {
        Some(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        None => (clear_session_cookie(jar), Redirect::to("/login")).into_response(),
    }
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<WebState>,
    jar: CookieJar,
    ClientAddr(peer): ClientAddr,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Response {
    if request.username.is_empty() || request.password.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "Username and password are required",
        );
    }

    let user = match state.users.get_user_by_username(&request.username).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "user lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    // Unknown user and wrong password produce the same message so usernames
    // cannot be enumerated.
    let Some(user) = user else {
        return api_error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    };
    if !user.is_active {
        return api_error(StatusCode::UNAUTHORIZED, "Account disabled");
    }
    if !auth::verify_password(&request.password, &user.password_hash) {
        return api_error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }

    let ip = client_ip(&headers, peer);
    let session = match state
        .users
        .create_session(user.id, &ip, SESSION_DURATION_SECS)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "session creation failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session");
        }
    };

    if let Err(e) = state.users.update_last_login(user.id, &ip).await {
        warn!(error = %e, "last_login update failed");
    }

    let message = if user.requires_password_change {
        "Login successful. Password change required."
    } else {
        "Login successful"
    };
    (
        jar.add(session_cookie(&session)),
        Json(ApiResponse::ok(message)),
    )
        .into_response()
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<WebState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Err(e) = state.users.delete_session(cookie.value()).await {
            warn!(error = %e, "session delete failed");
        }
    }
    (
        clear_session_cookie(jar),
        Json(ApiResponse::ok("Logged out successfully")),
    )
        .into_response()
}

/// POST /api/auth/password
///
/// Requires the current password, enforces the minimum length, and burns
/// every existing session for the user before issuing a fresh one bound to
/// the caller's IP.
pub async fn password_update(
    State(state): State<WebState>,
    jar: CookieJar,
    ClientAddr(peer): ClientAddr,
    headers: HeaderMap,
    Json(request): Json<PasswordUpdateRequest>,
) -> Response {
    let Some(ctx) = authenticate(&state, &jar, &headers, peer).await else {
        return api_error(StatusCode::UNAUTHORIZED, "Not authenticated");
    };

    if request.current_password.is_empty() || request.new_password.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "Current password and new password are required",
        );
    }
    if request.new_password.len() < auth::MIN_PASSWORD_LEN {
        return api_error(
            StatusCode::BAD_REQUEST,
            "New password must be at least 8 characters",
        );
    }
    if !auth::verify_password(&request.current_password, &ctx.user.password_hash) {
        return api_error(StatusCode::UNAUTHORIZED, "Current password is incorrect");
    }

    let new_hash = match auth::hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(error = %e, "password hash failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password");
        }
    };
    if let Err(e) = state.users.update_password(ctx.user.id, &new_hash).await {
        warn!(error = %e, "password update failed");
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to update password",
        );
    }

    // Force logout everywhere, then re-admit only this client.
    if let Err(e) = state.users.delete_all_user_sessions(ctx.user.id).await {
        warn!(error = %e, "session purge failed");
    }
    let ip = client_ip(&headers, peer);
    let session = match state
        .users
        .create_session(ctx.user.id, &ip, SESSION_DURATION_SECS)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "post-update session creation failed");
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password updated but failed to create new session",
            );
        }
    };

    (
        jar.add(session_cookie(&session)),
        Json(ApiResponse::ok("Password updated successfully")),
    )
        .into_response()
}

/// GET /api/auth/check
pub async fn check(
    State(state): State<WebState>,
    jar: CookieJar,
    ClientAddr(peer): ClientAddr,
    headers: HeaderMap,
) -> Response {
    match authenticate(&state, &jar, &headers, peer).await {
        Some(ctx) => Json(serde_json::json!({
            "authenticated": true,
            "username": ctx.user.username,
            "can_create_users": ctx.user.can_create_users,
            "requires_password_change": ctx.user.requires_password_change,
        }))
        .into_response(),
        None => Json(serde_json::json!({ "authenticated": false })).into_response(),
    }
}
