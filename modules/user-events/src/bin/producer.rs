use tracing_subscriber::EnvFilter;
use user_events::{connect, AppConfig, EventProducer, ProducerSettings, UserEvent, ACTION_USER_CREATED};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting user events producer...");

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        "Configuration loaded: topic={}, broker_type={}",
        config.topic,
        config.broker_type
    );

    let (broker, codec) = connect(&config).expect("Failed to set up broker connection");

    let settings = ProducerSettings::for_user_events(&config.topic, config.retry.clone());
    let producer = EventProducer::new(broker, codec, settings);

    let event = UserEvent::new(&uuid::Uuid::new_v4().to_string(), ACTION_USER_CREATED);
    tracing::info!("Publishing {} event for user {}", event.action, event.user_id);

    match producer.publish(event).await {
        Ok(ack) => {
            tracing::info!(
                "Event delivered to partition {} at offset {}",
                ack.partition,
                ack.offset
            );
        }
        Err(e) => {
            tracing::error!("Failed to publish event: {}", e);
            std::process::exit(1);
        }
    }
}
