// Watcher binary entry point: wires the scheduler, the compute function,
// the notification topic and the optional artifact store from configuration
// and runs until interrupted.

use common::config::{Settings, SubscriberConfig};
use common::handler::{ComputeFunction, HttpListingSource, ListingSource};
use common::notify::{LogSubscriber, Subscriber, TopicChannel, WebhookSubscriber};
use common::scheduler::{Dispatcher, Scheduler, SchedulerEngine};
use common::store::{ArtifactStore, BucketStore};
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before logging so the log level is configurable
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    info!(profile = ?settings.profile, "Starting apartment watcher");

    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        anyhow::anyhow!(e)
    })?;

    telemetry::init_metrics(settings.observability.metrics_port)?;

    let rule = settings.schedule.rule();
    let criteria = settings
        .check
        .criteria()
        .map_err(|e| anyhow::anyhow!(e))?;
    let role = settings.role.execution_role();
    info!(
        role = role.name(),
        cadence_seconds = settings.schedule.cadence_seconds,
        property = %settings.check.property,
        "Configuration loaded"
    );

    // Notification topic and its subscribers
    let channel = Arc::new(TopicChannel::new(settings.notify.topic.clone()));
    for subscriber in &settings.notify.subscribers {
        let subscriber: Arc<dyn Subscriber> = match subscriber {
            SubscriberConfig::Log { endpoint } => Arc::new(LogSubscriber::new(endpoint.clone())),
            SubscriberConfig::Webhook { url, secret } => {
                Arc::new(WebhookSubscriber::new(url.clone(), secret.clone()).map_err(|e| {
                    error!(error = %e, "Failed to create webhook subscriber");
                    e
                })?)
            }
        };
        channel.subscribe(subscriber).await;
    }
    info!(
        topic = channel.name(),
        subscriber_count = channel.subscriber_count().await,
        "Notification topic ready"
    );

    // Listing source
    let source: Arc<dyn ListingSource> = Arc::new(HttpListingSource::new(
        settings.check.source_url.clone(),
        settings.function.timeout_seconds,
    )?);

    // Compute function, with the artifact store when the profile carries one
    let mut function = ComputeFunction::new(
        role,
        source,
        channel.clone(),
        criteria,
        settings.check.property.clone(),
        rule.max_attempts(),
    );
    if let Some(store_config) = &settings.store {
        let store: Arc<dyn ArtifactStore> =
            Arc::new(BucketStore::new(&store_config.bucket_config())?);
        function = function
            .with_store(store)
            .with_state_key(store_config.state_key.clone());
        info!(bucket = %store_config.bucket, "Artifact store initialized");
    } else {
        info!("No artifact store configured; every matching unit is reported each tick");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        rule,
        Duration::from_secs(settings.function.timeout_seconds),
        Arc::new(function),
        settings.schedule.backoff_strategy(),
    ));

    let engine = Arc::new(SchedulerEngine::new(dispatcher));

    // Graceful shutdown on Ctrl+C
    let engine_for_shutdown = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = engine_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    info!("Starting scheduler loop");
    if let Err(e) = engine.start().await {
        error!(error = %e, "Scheduler error");
        return Err(anyhow::anyhow!(e));
    }

    telemetry::shutdown_tracer();
    info!("Watcher stopped");
    Ok(())
}
