use event_broker::EventEnvelope;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use user_events::{connect, AppConfig, ConsumerSettings, Delivery, EventConsumer, UserEvent};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting user events consumers...");

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        "Configuration loaded: topic={}, groups={}, broker_type={}",
        config.topic,
        config.group_ids.join(","),
        config.broker_type
    );

    let (broker, codec) = connect(&config).expect("Failed to set up broker connection");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One consumer task per group; each group receives every event
    let mut tasks = Vec::new();
    for group_id in &config.group_ids {
        let settings = ConsumerSettings {
            topic: config.topic.clone(),
            group_id: group_id.clone(),
            reset: config.reset_policy,
            commit_failure: config.commit_failure_policy,
            retry: config.retry.clone(),
        };
        let consumer =
            EventConsumer::new(broker.clone(), codec.clone(), settings, shutdown_rx.clone());

        let group = group_id.clone();
        tasks.push(tokio::spawn(async move {
            let handler_group = group.clone();
            let result = consumer
                .run(move |envelope: EventEnvelope<UserEvent>, delivery: Delivery| {
                    let group = handler_group.clone();
                    async move {
                        tracing::info!(
                            group_id = %group,
                            topic = %delivery.topic,
                            partition = delivery.partition,
                            offset = delivery.offset,
                            event_id = %envelope.id,
                            event_type = %envelope.event_type,
                            user_id = %envelope.data.user_id,
                            action = %envelope.data.action,
                            timestamp = envelope.data.timestamp,
                            "Handled user event"
                        );
                        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                    }
                })
                .await;

            if let Err(e) = result {
                tracing::error!("Consumer for group {} stopped with error: {}", group, e);
            }
        }));
    }

    tracing::info!("Consumers running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutdown requested, draining consumers...");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Consumer task panicked: {}", e);
        }
    }

    tracing::info!("All consumers stopped");
}
