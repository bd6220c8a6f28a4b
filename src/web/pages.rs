//! Page handlers and the alias form API.

use crate::domain_types::AliasName;
use crate::web::{WebState, render};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use std::net::IpAddr;
use tracing::warn;

const RECENT_LOG_LIMIT: i64 = 50;

/// GET /login
pub async fn login() -> Html<String> {
    Html(render::login_page())
}

/// GET /password-change
pub async fn password_change() -> Html<String> {
    Html(render::password_change_page())
}

/// GET /
pub async fn index() -> Html<String> {
    Html(render::index_page())
}

/// GET /connections
pub async fn connections(State(state): State<WebState>) -> Html<String> {
    let mut entries = state.registry.snapshot();
    entries.sort_by(|a, b| a.remote_addr.cmp(&b.remote_addr));
    Html(render::connections_page(&entries))
}

/// GET /logs
pub async fn logs(State(state): State<WebState>) -> Response {
    match state.logs.recent(RECENT_LOG_LIMIT).await {
        Ok(rows) => Html(render::logs_page(&rows)).into_response(),
        Err(e) => {
            warn!(error = %e, "recent logs query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch logs").into_response()
        }
    }
}

/// GET /query: the last 50 by default.
pub async fn query_page(State(state): State<WebState>) -> Response {
    match state.logs.recent(RECENT_LOG_LIMIT).await {
        Ok(rows) => Html(render::query_page(&rows, None)).into_response(),
        Err(e) => {
            warn!(error = %e, "recent logs query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch logs").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryForm {
    pub query: String,
}

/// POST /query: operator-supplied SQL against the read-only handle.
pub async fn run_query(
    State(state): State<WebState>,
    Form(form): Form<QueryForm>,
) -> Response {
    match state.logs.run_query(&form.query).await {
        Ok(rows) => Html(render::query_page(&rows, Some(&form.query))).into_response(),
        Err(e) => {
            warn!(error = %e, "operator query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Query failed").into_response()
        }
    }
}

/// GET /alias has nothing to show; back to the list.
pub async fn alias_get() -> Redirect {
    Redirect::to("/connections")
}

#[derive(Debug, Deserialize)]
pub struct AliasForm {
    pub ip: String,
    pub alias: String,
}

/// POST /alias updates the in-memory alias for a connection.
pub async fn alias_set(
    State(state): State<WebState>,
    Form(form): Form<AliasForm>,
) -> Response {
    let Ok(ip) = form.ip.parse::<IpAddr>() else {
        return (StatusCode::BAD_REQUEST, "Invalid IP parameter").into_response();
    };
    let Ok(alias) = AliasName::try_new(form.alias) else {
        return (StatusCode::BAD_REQUEST, "Alias too long (max 32 chars)").into_response();
    };
    if !state.registry.set_alias(ip, &alias) {
        return (StatusCode::NOT_FOUND, "Connection not found").into_response();
    }
    Redirect::to("/connections").into_response()
}

#[derive(Debug, Deserialize)]
pub struct AliasEditParams {
    pub ip: String,
}

/// GET /alias/edit?ip=…
pub async fn alias_edit_form(
    State(state): State<WebState>,
    Query(params): Query<AliasEditParams>,
) -> Response {
    let Ok(ip) = params.ip.parse::<IpAddr>() else {
        return (StatusCode::BAD_REQUEST, "Missing or invalid IP parameter").into_response();
    };
    match state.registry.lookup(ip) {
        Some(entry) => Html(render::alias_edit_page(&entry)).into_response(),
        None => (StatusCode::NOT_FOUND, "Connection not found").into_response(),
    }
}
