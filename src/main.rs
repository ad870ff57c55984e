//! Entry point: load config, wire the gate and authenticator, and run the auth server.

use presence_gate::config::Config;
use presence_gate::services::{ChannelAuthenticator, CredentialGate};
use presence_gate::{create_app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.password.is_empty() {
        tracing::warn!("PASSWORD is empty; only an empty password will be accepted");
    }
    match &config.credentials {
        Some(credentials) => tracing::info!(
            app_id = %credentials.app_id,
            cluster = %credentials.cluster,
            "signing presence grants"
        ),
        None => {
            for var in &config.missing_credentials {
                tracing::warn!(var = %var, "signing credential not set; channel auth will fail");
            }
        }
    }

    let state = AppState::new(
        CredentialGate::new(config.password.clone()),
        ChannelAuthenticator::new(config.credentials.clone()),
    );
    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
