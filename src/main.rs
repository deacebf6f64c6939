use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::HeaderValue;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod routes;
mod services;

use config::Config;
use services::{
    init, notification_queue::NotificationQueueService, publisher::NotificationPublisher,
    worker::NotificationWorker,
};

pub struct AppState {
    pub config: Config,
    pub queue: Arc<NotificationQueueService>,
    pub worker: NotificationWorker,
    pub publisher: NotificationPublisher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "inventory_notifications=debug,tower_http=debug".into()),
    );
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = Config::from_env()?;

    tracing::info!("Starting inventory notification service");

    let queue = init::init_queue_service(&config).await?;
    let worker = NotificationWorker::new(queue.clone());
    let publisher = NotificationPublisher::new(queue.clone());

    let app_state = Arc::new(AppState {
        config: config.clone(),
        queue,
        worker: worker.clone(),
        publisher,
    });

    init::start_worker(&config, &worker).await;

    let cors_origin = config
        .server
        .cors_allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid CORS_ALLOWED_ORIGIN: {}", e))?;

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/queue", routes::queue::router())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origin)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                ]),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        res = shutdown_signal() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received; server stopped accepting connections");
        }
    }

    // Let the worker finish its current batch.
    let shutdown_wait = Duration::from_secs(config.worker.shutdown_timeout_seconds);
    tracing::info!(
        "Waiting up to {}s for the notification worker to exit",
        shutdown_wait.as_secs()
    );
    if !worker.shutdown(shutdown_wait).await {
        tracing::warn!("Notification worker did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
