//! HTTP router and server.
//!
//! - `oauth2` endpoints under `/oauth2`, `/account` and `/.well-known`
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration, served by Redoc at `/api-docs`

pub mod health;
pub mod openapi;

pub use health::MISC_TAG;

use crate::AppResources;
use crate::oauth2::{self, OAuth2State};
use crate::startup::StartupError;
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Build the application router with all routes and middleware.
pub fn app(state: OAuth2State, resources: AppResources) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/oauth2", oauth2::router(state.clone()))
        .nest("/account", oauth2::account::router(state.clone()))
        .merge(oauth2::discovery::router(state))
        .routes(routes!(health::health))
        .layer(axum::Extension(resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server on the configured listen address.
#[tracing::instrument(skip(state, resources))]
pub async fn start_webserver(
    state: OAuth2State,
    resources: AppResources,
) -> Result<(), StartupError> {
    let addr = resources.config.domain.listen_addr.clone();
    let router = app(state, resources);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(addr = %addr, "server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(StartupError::Serve)?;

    Ok(())
}
