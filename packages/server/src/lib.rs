#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the crash map application.
//!
//! Serves `GET /api/crashes`, which validates the viewport filter, runs one
//! query against the configured remote dataset, and answers with a
//! `GeoJSON` `FeatureCollection`. The server holds no state beyond the
//! immutable source client built at startup.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use crash_map_source::{CrashSource, registry};
use crash_map_source_models::SourceDefinition;

/// Shared application state.
pub struct AppState {
    /// Client for the active dataset.
    pub source: Arc<dyn CrashSource>,
}

/// Bind address and port for the HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind_addr: String,
    /// TCP port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Reads `BIND_ADDR` and `PORT`, falling back to `127.0.0.1:8080`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/crashes", web::get().to(handlers::crashes)),
    );
}

/// Starts the HTTP server for the given dataset definition.
///
/// This is a regular async function; the caller provides the actix
/// runtime (e.g. via `#[actix_web::main]`) and initializes logging.
///
/// # Errors
///
/// Returns an `std::io::Result` error if the source client cannot be
/// built, or the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn serve(definition: &SourceDefinition, config: ServerConfig) -> std::io::Result<()> {
    if let Some(var) = registry::missing_configuration(definition) {
        log::warn!(
            "Source '{}' is not fully configured: set {var}. Queries will fail until it is.",
            definition.id
        );
    }

    let source: Arc<dyn CrashSource> =
        Arc::from(registry::connect(definition).map_err(std::io::Error::other)?);
    let state = web::Data::new(AppState { source });

    let ServerConfig { bind_addr, port } = config;
    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

/// Starts the crash map API server.
///
/// Initializes logging, resolves the dataset definition from the
/// environment, and serves on `BIND_ADDR`/`PORT`.
///
/// # Errors
///
/// Returns an `std::io::Result` error if the dataset definition cannot be
/// loaded or the server fails.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let definition = registry::load_from_env().map_err(std::io::Error::other)?;
    serve(&definition, ServerConfig::from_env()).await
}
