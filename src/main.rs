use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod db;
mod handlers;
mod messaging;
mod metrics;
mod pb;
mod repository;

use config::Config;
use handlers::RecordHandler;
use messaging::{EventStreamConsumer, KafkaEventPublisher, QueuedEventPublisher};
use pb::record::v1::record_service_server::RecordServiceServer;
use repository::PgRecordRepository;

const EVENT_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,record_service=debug")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        addr = %config.listen_addr,
        topic = %config.topic,
        "starting record service"
    );

    let metrics = Arc::new(metrics::Metrics::new()?);

    // Metrics HTTP server runs on its own runtime in a background thread.
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("metrics server error: {}", e);
            }
        });
    });

    let pool = db::connect(&config.database).await?;
    let repository = Arc::new(PgRecordRepository::new(pool.clone()));

    let kafka_publisher = Arc::new(
        KafkaEventPublisher::new(&config.broker_address)
            .context("failed to create event publisher")?,
    );
    let publisher = Arc::new(QueuedEventPublisher::start(
        kafka_publisher,
        EVENT_QUEUE_CAPACITY,
        metrics.clone(),
    ));

    // One token, several sources: the interrupt signal and the end of event
    // stream consumption both stop the serving loop.
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for interrupt: {}", e);
            } else {
                tracing::info!("interrupt received");
            }
            shutdown.cancel();
        });
    }

    {
        let shutdown = shutdown.clone();
        let consumer = EventStreamConsumer::new(
            &config.broker_address,
            "record-service",
            metrics.clone(),
        );
        let topic = config.topic.clone();
        tokio::spawn(async move {
            messaging::supervise_serving(
                consumer.consume(&topic, shutdown.clone()),
                shutdown.clone(),
            )
            .await;
        });
    }

    let handler = RecordHandler::new(
        repository,
        publisher,
        config.topic.clone(),
        metrics.clone(),
    );

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<RecordServiceServer<RecordHandler>>()
        .await;

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(pb::record::v1::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;

    tracing::info!("server listening on {}", config.listen_addr);
    tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(reflection_service)
        .add_service(RecordServiceServer::new(handler))
        .serve_with_shutdown(config.listen_addr, shutdown.clone().cancelled_owned())
        .await
        .context("grpc server failed")?;

    pool.close().await;
    tracing::info!("record service stopped");
    Ok(())
}
