use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use image_api::config::S3Config;
use image_api::reporter::init_sentry;
use image_api::{
    start_api_server, AppState, Backend, Config, ContentPolicy, DetectionFilter, ImageService,
    MongoRepository, PostgresRepository, Repositories, RekognitionAnalyzer, S3Store,
    SentryReporter,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    // Held for the lifetime of the process so queued events are flushed on exit
    let _sentry = init_sentry(config.sentry.as_ref())?;

    info!(
        service = %config.service.name,
        "Starting image API"
    );

    init_metrics(config.service.metrics_port)?;

    if !config.has_backend() {
        bail!("No persistence backend configured; set [mongo] and/or [postgres]");
    }

    let sdk_config = load_aws_config(&config.s3).await;
    let store = Arc::new(S3Store::new(&sdk_config, &config.s3));
    let analyzer = Arc::new(RekognitionAnalyzer::new(&sdk_config, &config.s3.bucket));

    let mut repositories = Repositories::new();

    if let Some(ref mongo) = config.mongo {
        let repository = MongoRepository::new(mongo)
            .await
            .context("Failed to initialize MongoDB repository")?;
        repositories = repositories.with(Backend::Mongo, Arc::new(repository));
    }

    if let Some(ref postgres) = config.postgres {
        let repository = PostgresRepository::new(postgres)
            .await
            .context("Failed to initialize PostgreSQL repository")?;

        if postgres.run_migrations {
            repository
                .run_migrations()
                .await
                .context("Failed to run database migrations")?;
        }
        repositories = repositories.with(Backend::Postgres, Arc::new(repository));
    }

    let service = ImageService::new(
        store,
        analyzer,
        DetectionFilter::new(&config.analysis),
        ContentPolicy::new(&config.policy),
        repositories,
        Arc::new(SentryReporter),
    );

    start_api_server(AppState { service }, &config.api, shutdown_signal()).await?;

    info!("Image API stopped");

    Ok(())
}

/// Shared AWS configuration for the S3 and Rekognition clients
async fn load_aws_config(s3: &S3Config) -> aws_types::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(s3.region.clone()));

    if let (Some(key_id), Some(secret)) = (&s3.access_key_id, &s3.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            key_id.clone(),
            secret.clone(),
            None,
            None,
            "image-api-config",
        ));
    }

    loader.load().await
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
