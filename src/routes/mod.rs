pub mod auth;
pub mod notifications;
pub mod posts;
pub mod users;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::{AppState, UPLOADS_URL_PREFIX};

/// The full application: JSON API under `/api`, stored images under
/// `/uploads`.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let api = Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(posts::router())
        .merge(notifications::router());

    let uploads = ServeDir::new(state.config.uploads_path()?);
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .layer(DefaultBodyLimit::max(state.config.storage.max_upload_bytes));

    Ok(Router::new()
        .nest("/api", api)
        .nest_service(UPLOADS_URL_PREFIX, uploads)
        .layer(middleware)
        .with_state(state))
}

/// Credentialed CORS for the configured browser origin. Without one, no
/// cross-origin requests are allowed.
fn cors_layer(config: &Config) -> CorsLayer {
    let origin = match config.server.cors_origin.as_deref() {
        Some(origin) => origin,
        None => return CorsLayer::new(),
    };

    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
        Err(e) => {
            tracing::warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
            CorsLayer::new()
        }
    }
}
