pub mod meter;

use std::time::Duration;

use anyhow::Context as _;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

//KNOWN ISSUES:
// - OpenTelemetry log appender doesn't contain trace-id and attributes from the span

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    pub service_name: String,
    pub app_name: String,
    #[serde(default)]
    pub logs: EnvFilterConfig,
    #[serde(default)]
    pub traces: EnvFilterConfig,
    pub otlp: Option<OtlpConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Without `url` all signals are written to stdout.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OtlpConfig {
    pub url: Option<String>,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    60
}

impl Default for EnvFilterConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_owned(),
            filters: vec![],
        }
    }
}

impl TryFrom<&EnvFilterConfig> for EnvFilter {
    type Error = tracing_subscriber::filter::ParseError;

    fn try_from(config: &EnvFilterConfig) -> Result<Self, Self::Error> {
        EnvFilter::builder()
            .with_default_directive(config.default_level.parse()?)
            .parse(config.filters.join(","))
    }
}

impl MonitoringConfig {
    pub fn init(&self) -> anyhow::Result<()> {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::default());

        let log_filter = EnvFilter::try_from(&self.logs).context("Invalid log filter")?;

        let Some(otlp) = &self.otlp else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(log_filter)
                .init();
            return Ok(());
        };

        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", self.service_name.clone()))
            .with_attribute(KeyValue::new("app.name", self.app_name.clone()))
            .build();

        let fmt_layer = tracing_subscriber::fmt::layer().with_filter(log_filter);

        let logger_provider = otlp.logger_provider(resource.clone())?;
        let logging_filter = EnvFilter::try_from(&self.logs).context("Invalid log filter")?;
        let logging_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(logging_filter);

        let tracer = otlp.tracer_provider(resource.clone())?.tracer(self.app_name.clone());
        let tracing_filter = EnvFilter::try_from(&self.traces).context("Invalid trace filter")?;
        let tracing_layer = OpenTelemetryLayer::new(tracer).with_filter(tracing_filter);

        opentelemetry::global::set_meter_provider(otlp.meter_provider(resource)?);

        tracing_subscriber::registry()
            .with(tracing_layer)
            .with(logging_layer)
            .with(fmt_layer)
            .init();

        Ok(())
    }
}

impl OtlpConfig {
    fn tracer_provider(&self, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
        let builder = SdkTracerProvider::builder().with_resource(resource);

        Ok(match &self.url {
            Some(url) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(url)
                    .build()?;
                builder.with_batch_exporter(exporter).build()
            }
            None => builder
                .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
                .build(),
        })
    }

    fn logger_provider(&self, resource: Resource) -> anyhow::Result<SdkLoggerProvider> {
        let builder = SdkLoggerProvider::builder().with_resource(resource);

        Ok(match &self.url {
            Some(url) => {
                let exporter = opentelemetry_otlp::LogExporter::builder()
                    .with_tonic()
                    .with_endpoint(url)
                    .build()?;
                builder.with_batch_exporter(exporter).build()
            }
            None => builder
                .with_simple_exporter(opentelemetry_stdout::LogExporter::default())
                .build(),
        })
    }

    fn meter_provider(&self, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
        let interval = Duration::from_secs(self.metrics_interval_secs);
        let builder = SdkMeterProvider::builder().with_resource(resource);

        Ok(match &self.url {
            Some(url) => {
                let exporter = opentelemetry_otlp::MetricExporter::builder()
                    .with_tonic()
                    .with_endpoint(url)
                    .build()?;
                builder
                    .with_reader(PeriodicReader::builder(exporter).with_interval(interval).build())
                    .build()
            }
            None => builder
                .with_reader(
                    PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                        .with_interval(interval)
                        .build(),
                )
                .build(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_config_builds_env_filter() {
        let config = EnvFilterConfig {
            default_level: "warn".to_owned(),
            filters: vec!["octopus_energy_jp=debug".to_owned(), "rumqttc=error".to_owned()],
        };

        assert!(EnvFilter::try_from(&config).is_ok());
    }

    #[test]
    fn invalid_level_is_rejected() {
        let config = EnvFilterConfig {
            default_level: "octopus_energy_jp=loud".to_owned(),
            filters: vec![],
        };

        assert!(EnvFilter::try_from(&config).is_err());
    }

    #[test]
    fn stdout_meter_provider_is_built_without_url() {
        let otlp = OtlpConfig {
            url: None,
            metrics_interval_secs: 5,
        };

        let provider = otlp.meter_provider(Resource::builder().build()).unwrap();

        assert!(provider.shutdown().is_ok());
    }
}
