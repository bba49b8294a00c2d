// Social network server

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

use network_server::{app_state::AppState, config::Config, handlers::create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    let addr = config.server_address();

    // Initialize application state
    let app_state = AppState::new(config).await?;

    // Build application router
    let app = create_router(app_state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    info!("Server starting on http://{}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
