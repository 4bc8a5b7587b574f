pub mod meter;

use std::error::Error;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    pub service_name: String,
    pub logs: EnvFilterConfig,
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Export of traces, logs and metrics. Without `url` everything goes to stdout.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OtlpConfig {
    pub url: Option<String>,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    15
}

impl EnvFilterConfig {
    fn to_env_filter(&self) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
        EnvFilter::builder()
            .with_default_directive(self.default_level.parse()?)
            .parse(self.filters.join(","))
    }
}

impl MonitoringConfig {
    pub fn init(&self) -> Result<(), Box<dyn Error>> {
        let Some(otlp) = &self.otlp else {
            let fmt_layer = tracing_subscriber::fmt::layer().with_filter(self.logs.to_env_filter()?);
            tracing_subscriber::registry().with(fmt_layer).init();
            return Ok(());
        };

        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::default());
        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", self.service_name.clone()))
            .build();

        let fmt_layer = tracing_subscriber::fmt::layer().with_filter(self.logs.to_env_filter()?);

        let logger_provider = init_logs(resource.clone(), otlp)?;
        let logging_layer =
            OpenTelemetryTracingBridge::new(&logger_provider).with_filter(self.logs.to_env_filter()?);

        let tracer = init_traces(resource.clone(), otlp)?.tracer(self.service_name.clone());
        let tracing_layer = OpenTelemetryLayer::new(tracer).with_filter(self.logs.to_env_filter()?);

        opentelemetry::global::set_meter_provider(init_metrics(resource, otlp)?);

        tracing_subscriber::registry()
            .with(tracing_layer)
            .with(logging_layer)
            .with(fmt_layer)
            .init();

        Ok(())
    }
}

fn init_traces(resource: Resource, config: &OtlpConfig) -> Result<SdkTracerProvider, ExporterBuildError> {
    let builder = SdkTracerProvider::builder().with_resource(resource);

    Ok(match &config.url {
        Some(url) => builder
            .with_batch_exporter(
                opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(url)
                    .build()?,
            )
            .build(),
        None => builder
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build(),
    })
}

fn init_metrics(resource: Resource, config: &OtlpConfig) -> Result<SdkMeterProvider, ExporterBuildError> {
    let interval = Duration::from_secs(config.metrics_interval_secs);

    match &config.url {
        Some(url) => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(url)
                .build()?;
            let reader = PeriodicReader::builder(exporter).with_interval(interval).build();

            Ok(SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource)
                .build())
        }
        None => {
            let reader = PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(interval)
                .build();

            Ok(SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource)
                .build())
        }
    }
}

fn init_logs(resource: Resource, config: &OtlpConfig) -> Result<SdkLoggerProvider, ExporterBuildError> {
    let builder = SdkLoggerProvider::builder().with_resource(resource);

    Ok(match &config.url {
        Some(url) => builder
            .with_batch_exporter(
                opentelemetry_otlp::LogExporter::builder()
                    .with_tonic()
                    .with_endpoint(url)
                    .build()?,
            )
            .build(),
        None => builder
            .with_simple_exporter(opentelemetry_stdout::LogExporter::default())
            .build(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_with_directives() {
        let config = EnvFilterConfig {
            default_level: "info".to_string(),
            filters: vec!["unit_assets=debug".to_string(), "actix_web=warn".to_string()],
        };

        assert!(config.to_env_filter().is_ok());
    }

    #[test]
    fn invalid_default_level_is_rejected() {
        let config = EnvFilterConfig {
            default_level: "unit_assets=loud".to_string(),
            filters: vec![],
        };

        assert!(config.to_env_filter().is_err());
    }

    #[test]
    fn stdout_metrics_provider_without_url() {
        let config = OtlpConfig {
            url: None,
            metrics_interval_secs: 60,
        };

        let provider = init_metrics(Resource::builder().build(), &config).unwrap();

        assert!(provider.shutdown().is_ok());
    }
}
