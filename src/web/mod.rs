//! Web UI router: the authenticated read path over the registry and the
//! read-only log store.

pub mod auth_api;
pub mod pages;
pub mod render;

use crate::registry::ConnectionRegistry;
use crate::storage::{ReadOnlyLogStore, UserStore};
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for every web handler.
#[derive(Clone)]
pub struct WebState {
    pub registry: Arc<ConnectionRegistry>,
    pub logs: ReadOnlyLogStore,
    pub users: UserStore,
    pub static_dir: PathBuf,
}

/// Build the full route table.
///
/// Session enforcement wraps the page routes; the auth API endpoints stand
/// alone and validate their own cookies where they need one.
pub fn router(state: WebState) -> Router {
    let protected = Router::new()
        .route("/", get(pages::index))
        .route("/connections", get(pages::connections))
        .route("/logs", get(pages::logs))
        .route("/query", get(pages::query_page).post(pages::run_query))
        .route("/alias", get(pages::alias_get).post(pages::alias_set))
        .route("/alias/edit", get(pages::alias_edit_form))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_api::require_session,
        ));

    // The password-change page only needs a live session; it must stay
    // reachable while the change is still pending.
    let pending_password = Router::new()
        .route("/password-change", get(pages::password_change))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_api::require_session_any,
        ));

    Router::new()
        .route("/login", get(pages::login))
        .route("/api/auth/login", post(auth_api::login))
        .route("/api/auth/logout", post(auth_api::logout))
        .route("/api/auth/password", post(auth_api::password_update))
        .route("/api/auth/check", get(auth_api::check))
        .merge(protected)
        .merge(pending_password)
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the web UI until cancellation.
///
/// # Errors
///
/// Returns the underlying I/O error from bind or serve.
pub async fn serve(
    host: &str,
    port: u16,
    state: WebState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(%host, port, "web UI listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}
