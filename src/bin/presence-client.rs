//! Demo client: join a presence channel and print the normalized events.
//!
//! Reads `CLIENT_PASSWORD` and `CLIENT_NAME` plus the `ClientConfig` variables.

use std::sync::Arc;

use presence_gate::client::{
    auth_params, FileStorage, IdentityStore, PusherOptions, PusherTransport, SubscriptionSession,
};
use presence_gate::config::ClientConfig;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let identity = IdentityStore::new(FileStorage::new(&config.identity_dir)).get_or_create();
    let password = std::env::var("CLIENT_PASSWORD").unwrap_or_default();
    let name = std::env::var("CLIENT_NAME").unwrap_or_else(|_| {
        format!("guest-{}", identity.uuid.chars().take(8).collect::<String>())
    });
    tracing::info!(uuid = %identity.uuid, name = %name, "starting presence client");

    let transport = Arc::new(PusherTransport::connect(PusherOptions::from(&config)).await?);
    let (tx, mut rx) = mpsc::channel(16);
    let mut session = SubscriptionSession::new(config.channel.clone(), transport, tx)
        .with_auth_timeout(config.auth_timeout);
    session.connect(auth_params(&password, &name)).await?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Some(presence) = session.presence().await {
        let subscribed_for = chrono::Utc::now() - presence.subscribed_at;
        tracing::info!(
            members = presence.members.len(),
            subscribed_secs = subscribed_for.num_seconds(),
            "leaving {}",
            presence.channel_name
        );
    }
    Ok(())
}
