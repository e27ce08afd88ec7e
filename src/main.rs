mod auth;
mod config;
mod db;
mod error;
mod mailer;
mod models;
mod routes;
mod state;
mod templates;

use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(pool.as_ref()).await?;

    let mailer = mailer::Mailer::new(&config)?;
    if config.mail_api_url.is_none() {
        tracing::warn!("MAIL_API_URL not set, outgoing mail will only be logged");
    }

    let state = Arc::new(state::AppState {
        pool,
        config: config.clone(),
        mailer,
    });

    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Atelier listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
