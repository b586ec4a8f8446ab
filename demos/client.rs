use deriv_rs::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize the logger
    tracing_subscriber::fmt().init();

    // Load the configuration settings (config/deriv.toml, DERIV_APP_ID, ...)
    let config = ClientConfig::load()?;

    let client = DerivClient::connect(&config).await?;

    let pong = client.ping().await?;
    tracing::info!("ping -> {:?}", pong.get("ping"));

    let (first, subscription) = client.subscribe(Request::ticks("R_100")).await?;
    if let Some(error) = first.error() {
        tracing::error!("Tick subscription refused: {}", error);
        client.disconnect().await?;
        return Ok(());
    }

    if let Some(mut subscription) = subscription {
        let delivered = client.listen_for(Duration::from_secs(5)).await?;
        tracing::info!("{} tick(s) received on {}", delivered, subscription.id);

        while let Some(tick) = subscription.try_recv() {
            tracing::info!("tick {:?}", tick.get("tick"));
        }

        client.cancel_subscription(&subscription.id).await?;
    }

    client.disconnect().await?;

    Ok(())
}
