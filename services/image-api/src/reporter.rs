use crate::config::SentryConfig;
use anyhow::Context;
use std::error::Error;
use tracing::{error, warn};

/// One-way sink for failures and notable events; calls never block or fail
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, operation: &str, error: &(dyn Error + 'static));

    fn report_message(&self, operation: &str, message: &str);
}

/// Logs through tracing and forwards to Sentry when a client is bound
#[derive(Debug, Default, Clone, Copy)]
pub struct SentryReporter;

impl ErrorReporter for SentryReporter {
    fn report_error(&self, operation: &str, err: &(dyn Error + 'static)) {
        error!(operation = %operation, error = %err, "Upstream call failed");
        metrics::counter!(
            "adapter.failures",
            "adapter" => adapter_for(operation),
            "operation" => operation.to_string()
        )
        .increment(1);

        sentry::with_scope(
            |scope| scope.set_tag("operation", operation),
            || sentry::capture_error(err),
        );
    }

    fn report_message(&self, operation: &str, message: &str) {
        warn!(operation = %operation, "{message}");

        sentry::with_scope(
            |scope| scope.set_tag("operation", operation),
            || sentry::capture_message(message, sentry::Level::Warning),
        );
    }
}

/// Adapter that an orchestrator operation name belongs to
fn adapter_for(operation: &str) -> &'static str {
    match operation {
        "upload" | "delete_object" | "delete_all_objects" => "storage",
        "detect" => "analysis",
        "list_images" | "get_image" | "insert" | "delete_lookup" | "delete_record" => {
            "persistence"
        }
        _ => "other",
    }
}

/// Install the Sentry client; the returned guard flushes pending events on drop
pub fn init_sentry(config: Option<&SentryConfig>) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let Some((config, dsn)) = config.and_then(|c| Some((c, c.dsn.as_deref()?))) else {
        return Ok(None);
    };
    let dsn: sentry::types::Dsn = dsn.parse().context("Invalid Sentry DSN")?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: sentry::release_name!(),
        environment: config.environment.clone().map(Into::into),
        sample_rate: config.sample_rate,
        ..Default::default()
    });

    Ok(Some(guard))
}
