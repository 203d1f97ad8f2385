use anyhow::Context;
use http::{HeaderName, HeaderValue, Method, header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rampart::{
    build_router,
    clock::{SharedClock, SystemClock},
    middleware_layer::signature::{X_API_KEY, X_SIGNATURE, X_TIMESTAMP},
    AppState, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!(?config, "✅ Configuration loaded successfully");

    let clock: SharedClock = Arc::new(SystemClock);
    let state = AppState::new(&config, clock)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!("✅ AppState initialized");

    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://[::1]:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            HeaderName::from_static(X_API_KEY),
            HeaderName::from_static(X_SIGNATURE),
            HeaderName::from_static(X_TIMESTAMP),
        ])
        .allow_credentials(true)
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(86400));

    // coarse per-peer ceiling in front of the counter-based guard
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1_000)
            .burst_size(5_000)
            .use_headers()
            .finish()
            .context("Invalid governor configuration")?,
    );

    let app = build_router(state)
        .layer(tower_governor::GovernorLayer::new(governor_conf))
        .layer(cors);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid BIND_ADDR {}", config.bind_addr))?;

    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
