use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::database::UserStore;
use crate::handlers::{system, users};
use crate::middleware::{handle_panic, route_not_found};

/// Shared handler state. Handlers hold no state of their own.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

pub fn router(state: AppState, config: &AppConfig) -> Router {
    let mut app = Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .merge(user_routes())
        .fallback(route_not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        // Innermost so every handler panic becomes a 500 envelope
        .layer(CatchPanicLayer::custom(handle_panic));

    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security.cors_origins));
    }
    app
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(users::list))
        .route("/married-users", get(users::list_married))
        .route("/user/:id", get(users::get).put(users::update))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::PUT])
        .allow_headers([header::CONTENT_TYPE])
}
