use crate::{
    config::{Configuration, Settings},
    db::DbPool,
    pages::routes::PageRoutes,
};
use std::sync::Arc;

/// Shared by every handler through axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Configuration>,
    pub settings: Arc<Settings>,
    pub routes: Arc<PageRoutes>,
    /// Outbound client for Google, reCAPTCHA and the mail relay.
    pub http: reqwest::Client,
}

#[cfg(test)]
impl AppState {
    /// State over a lazily connected pool, for handlers that never reach the
    /// database. Must be built inside a Tokio runtime.
    pub fn for_tests(config: serde_json::Value, home_path: std::path::PathBuf) -> Self {
        let config = Configuration::from_value(config);
        let settings = Settings {
            database_url: "postgres://localhost/lightning_test".to_string(),
            server_port: 0,
            config_path: std::path::PathBuf::from("config/config.json"),
            home_path,
        };
        Self {
            pool: sqlx::postgres::PgPoolOptions::new()
                .connect_lazy(&settings.database_url)
                .expect("valid test database URL"),
            routes: Arc::new(PageRoutes::from_config(&config)),
            config: Arc::new(config),
            settings: Arc::new(settings),
            http: reqwest::Client::new(),
        }
    }
}
