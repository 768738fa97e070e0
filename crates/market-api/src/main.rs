//! # Template Market
//!
//! Payment pipeline for a template and service marketplace.
//!
//! ## Usage
//!
//! ```bash
//! # Optional: without these the server runs in simulate mode
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_PUBLISHABLE_KEY=pk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//!
//! # LOG_FORMAT=json for structured logs
//! template-market
//! ```

use market_api::{routes, state::AppState};
use market_stripe::REQUIRED_WEBHOOK_EVENTS;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    print_banner();

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment mode: {}", state.mode());
    if state.is_simulated() {
        warn!("No payment provider configured: checkouts are fulfilled immediately");
    } else {
        info!("Webhook events to enable: {}", REQUIRED_WEBHOOK_EVENTS.join(", "));
    }

    let background = state.background.clone();
    let app = routes::create_router(state);

    info!("Template Market starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Checkout: POST http://{}/checkout/template", addr);
        info!("Webhook: POST http://{}/webhooks/payment", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight payouts and notifications finish
    info!("Draining background effects");
    background.flush().await;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn print_banner() {
    println!(
        r#"
  Template Market
  ━━━━━━━━━━━━━━━━━━━━━━━
  Checkout, fulfillment and creator payouts
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
