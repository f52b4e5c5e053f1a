//! keywarden library - http handlers and application setup.

pub mod cli;
pub mod fsm;
pub mod handlers;
pub mod node_agent;
pub mod pruner;
pub mod transitioner;

use std::time::Instant;

use axum::{
    Router,
    extract::{Request, State},
    http::header::{DATE, SERVER},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use chrono::Utc;
use uuid::Uuid;

use keywarden_db::KeywardenDb;
use keywarden_types::Config;

/// application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: KeywardenDb,
    pub config: Config,
    /// parsed operator admin key, accepted as a signature fallback.
    pub admin_key: Option<ssh_key::PublicKey>,
}

/// create the axum application with all routes.
pub async fn create_app(db: KeywardenDb, config: Config) -> Router {
    let admin_key = config.admin_authorized_key.as_deref().and_then(|line| {
        match ssh_key::PublicKey::from_openssh(line) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparsable admin authorized key");
                None
            }
        }
    });

    let state = AppState {
        db,
        config,
        admin_key,
    };

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/pivtokens", handlers::pivtokens_router())
        .nest(
            "/recovery-configurations",
            handlers::recovery_configurations_router(),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            response_headers,
        ))
        .with_state(state)
}

/// stamp the standard response headers on every reply.
async fn response_headers(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    if let Ok(value) = request_id.parse() {
        headers.insert("x-request-id", value);
    }
    if let Ok(value) = state.config.server_name.parse() {
        headers.insert("x-server-name", value);
    }
    if let Ok(value) = format!("{}ms", start.elapsed().as_millis()).parse() {
        headers.insert("x-response-time", value);
    }
    if let Ok(value) = concat!("keywarden/", env!("CARGO_PKG_VERSION")).parse() {
        headers.insert(SERVER, value);
    }
    // hyper only stamps Date on real connections; do it here so the header
    // is present regardless of how the router is driven
    if !headers.contains_key(DATE)
        && let Ok(value) = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string().parse()
    {
        headers.insert(DATE, value);
    }
    response
}
