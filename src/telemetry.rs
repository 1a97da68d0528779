use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub otlp_endpoint: String,
}

impl From<&AppConfig> for TelemetryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            service_name: config.telemetry_service_name.clone(),
            service_version: config.telemetry_service_version.clone(),
            environment: config.telemetry_environment.clone(),
            otlp_endpoint: config.telemetry_otlp_endpoint.clone(),
        }
    }
}

/// Keeps the span exporter alive; call [`Telemetry::shutdown`] before exit
/// so buffered spans are flushed.
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Installs the global subscriber: JSON logs filtered by `RUST_LOG`
    /// (default `info`), plus OTLP span export when enabled.
    pub fn init(config: &AppConfig) -> Result<Self, TelemetryError> {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        if !config.telemetry_enabled {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
            return Ok(Self { provider: None });
        }

        let telemetry = TelemetryConfig::from(config);
        let provider = build_provider(&telemetry)?;
        let tracer = provider.tracer(telemetry.service_name.clone());

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .with(OpenTelemetryLayer::new(tracer))
            .try_init()?;
        opentelemetry::global::set_tracer_provider(provider.clone());

        tracing::info!(
            service = %telemetry.service_name,
            endpoint = %telemetry.otlp_endpoint,
            "OpenTelemetry initialized"
        );

        Ok(Self {
            provider: Some(provider),
        })
    }

    pub fn shutdown(self) {
        let Some(provider) = self.provider else {
            return;
        };
        match provider.shutdown() {
            Ok(()) => tracing::info!("OpenTelemetry tracer provider shut down"),
            Err(e) => tracing::warn!(error = %e, "failed to shut down tracer provider"),
        }
    }
}

fn build_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, TelemetryError> {
    let resource = Resource::builder_empty()
        .with_attribute(KeyValue::new(SERVICE_NAME, config.service_name.clone()))
        .with_attribute(KeyValue::new(SERVICE_VERSION, config.service_version.clone()))
        .with_attribute(KeyValue::new(
            "deployment.environment.name",
            config.environment.clone(),
        ))
        .build();

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
