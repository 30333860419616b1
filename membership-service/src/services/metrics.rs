use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static TOKENS_ISSUED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static NOTIFICATIONS_PROCESSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Register every collector. Safe to call more than once; later calls are no-ops.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    let _guard = INIT_LOCK
        .lock()
        .map_err(|e| anyhow::anyhow!("Metrics init lock poisoned: {}", e))?;
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;

    let request_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;

    let tokens_issued = IntCounterVec::new(
        Opts::new("tokens_issued_total", "Signed tokens issued by kind"),
        &["kind"],
    )?;

    let notifications_processed = IntCounterVec::new(
        Opts::new(
            "notifications_processed_total",
            "Notifications processed by the scheduler",
        ),
        &["type", "status"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(request_duration.clone()))?;
    registry.register(Box::new(tokens_issued.clone()))?;
    registry.register(Box::new(notifications_processed.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = TOKENS_ISSUED_TOTAL.set(tokens_issued);
    let _ = NOTIFICATIONS_PROCESSED_TOTAL.set(notifications_processed);

    Ok(())
}

pub fn record_token_issued(kind: &str) {
    if let Some(counter) = TOKENS_ISSUED_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}

pub fn record_notification(notification_type: &str, status: &str) {
    if let Some(counter) = NOTIFICATIONS_PROCESSED_TOTAL.get() {
        counter
            .with_label_values(&[notification_type, status])
            .inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
