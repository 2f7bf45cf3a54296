use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod apns;
mod config;
mod content;
mod feed;
mod registry;
mod scheduler;

use api::auth::{AuthState, RateLimiter};
use api::AppState;
use apns::ApnsClient;
use config::AppConfig;
use content::ContentSource;
use feed::FeedService;
use registry::DeviceRegistry;
use scheduler::DispatchScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🚀 Starting Halo Relay...");

    // -----------------------------
    // Configuration (fatal if incomplete)
    // -----------------------------
    let config = Arc::new(AppConfig::from_env()?);
    println!("🔔 Push gateway: {}", config.apns_url());

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let registry = Arc::new(DeviceRegistry::new());
    let gateway = Arc::new(ApnsClient::new(&config)?);

    let feed = config.feed_base_url.clone().map(|url| {
        println!("📡 Feed configured: {url}");
        Arc::new(FeedService::new(url))
    });
    if feed.is_none() {
        println!("⚠️ No feed configured - calendar/email slots use placeholders");
    }
    if let Some(feed) = &feed {
        Arc::clone(feed).spawn_refresh_loop(config.feed_refresh_secs, Arc::clone(&registry));
    }

    let content = Arc::new(ContentSource::new(feed));

    let dispatcher = Arc::new(DispatchScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&content),
        Arc::clone(&gateway),
        Duration::from_secs(config.tick_secs),
    ));
    dispatcher.start().await;
    println!("🔄 Content rotation every {} seconds", config.tick_secs);

    let state = AppState {
        registry,
        gateway,
        config: Arc::clone(&config),
    };
    let auth = AuthState {
        secret: config.jwt_secret.clone(),
        limiter: RateLimiter::default(),
    };

    // -----------------------------
    // Router
    // -----------------------------
    let app = api::router()
        .layer(axum::Extension(auth))
        // CORS for clients
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    println!("🌐 HTTP listening on http://{addr}");
    println!("🚀 Server ready for connections");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // In-flight dispatches are abandoned here; the registry only ever loses
    // evictions on shutdown, which is safe.
    dispatcher.stop().await;
    println!("🛑 Scheduler stopped");

    Ok(())
}
