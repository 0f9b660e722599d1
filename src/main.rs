//! Lightning - Website Framework Entry Point
//!
//! A server for content sites: pages and a blog stored in PostgreSQL, a
//! contact form, mailing lists with criteria-based audiences, in-place CMS
//! editing, Google sign-in and an image browser for admins.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Sessions**: random cookie key, stored as a SHA-256 hash
//! - **Pages**: one front controller resolving `routes.static` / `routes.dynamic`
//!
//! # Startup Flow
//!
//! 1. Load bootstrap settings from environment variables
//! 2. Load the site configuration tree
//! 3. Create database connection pool
//! 4. Run database migrations and conform code-defined schemas
//! 5. Build HTTP router with routes, static files and middleware
//! 6. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod pages;
mod query;
mod schema;
mod services;
mod social;
mod state;
mod view;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

use axum::{Router, middleware as axum_middleware, routing::get};
use tower_http::{services::ServeDir, trace::TraceLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = config::Settings::from_env()?;
    let configuration = config::Configuration::load(&settings)?;
    tracing::info!(config = %settings.config_path.display(), "Configuration loaded");

    let pool = db::create_pool(&settings.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    db::conform_schemas(&pool).await?;
    tracing::info!("Database migrations complete");

    let routes = pages::routes::PageRoutes::from_config(&configuration);
    let volumes = handlers::elfinder::volumes(&configuration, &settings.home_path);

    let state = state::AppState {
        pool,
        config: Arc::new(configuration),
        settings: Arc::new(settings.clone()),
        routes: Arc::new(routes),
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?,
    };

    let mut site = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/elfinder",
            get(handlers::elfinder::connector).post(handlers::elfinder::connector),
        );

    // Files managed by the image browser are public at their volume URL.
    for volume in volumes {
        let path = volume.url.trim_end_matches('/');
        if path.starts_with('/') && path.len() > 1 {
            site = site.nest_service(path, ServeDir::new(&volume.root));
        }
    }

    let site = site
        // Everything else is a page
        .fallback(pages::front_controller)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::session::session_middleware,
        ))
        .with_state(state);

    // Static assets win over pages; misses fall through to the site.
    let public = ServeDir::new(settings.home_path.join("public"))
        .call_fallback_on_method_not_allowed(true)
        .fallback(site);

    let app = Router::new()
        .fallback_service(public)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", settings.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
