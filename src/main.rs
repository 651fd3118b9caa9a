use busline::bus::{ListenerConfig, Message, Registration, handler_fn, on_sync};
use busline::config::load_config;
use busline::transport::{Consumer, WebSocketTransport};
use busline::utils::{BoxError, logging};
use tracing::{error, info};

/// Answers every request on the configured topic with its own body.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let settings = load_config()?;
    logging::init(&settings.log.level);

    let echo = handler_fn(|message: Message<serde_json::Value>| async move {
        Ok::<_, BoxError>(message.into_body())
    });
    let config = ListenerConfig::from_settings(&settings).with_handler(echo);

    let Registration {
        mut consumer,
        connection,
    } = on_sync(&WebSocketTransport::new(), config).await?;

    if let Err(e) = connection {
        error!("Listener failed: {}", e);
        consumer.stop().await;
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    consumer.stop().await;

    Ok(())
}
