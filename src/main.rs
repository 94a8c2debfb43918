use std::net::SocketAddr;

use axum::Extension;
use tracing_subscriber::{fmt, EnvFilter};

use metering::gateway::{HttpGateway, SandboxGateway, SharedGateway};
use metering::store::MemoryStore;
use metering::{config, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    // Single-process store: fine for local development, never for a
    // multi-replica deployment (see MemoryStore docs).
    let store = MemoryStore::shared();

    let gateway: SharedGateway = match config::PAYMENT_GATEWAY_URL.as_deref() {
        Some(base_url) => std::sync::Arc::new(HttpGateway::new(base_url)?),
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL unset, using the sandbox gateway");
            SandboxGateway::shared()
        }
    };

    let app = routes::api_routes()
        .layer(Extension(store))
        .layer(Extension(gateway));

    let addr: SocketAddr = format!("{}:{}", *config::BIND_ADDRESS, *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "metering service listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
