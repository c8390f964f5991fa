use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider};
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::SdkMeterProvider,
    trace::{SdkTracerProvider, TracerProviderBuilder},
};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::config::ServerConfig;

/// OTLP providers that must be flushed before the process exits.
#[derive(Default)]
pub struct TelemetryProviders {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl TelemetryProviders {
    pub fn shutdown(self) {
        if let Some(tracer) = self.tracer {
            if let Err(err) = tracer.force_flush() {
                error!("Error flushing traces: {:?}", err);
            }
            if let Err(err) = tracer.shutdown() {
                error!("Error shutting down tracer provider: {:?}", err);
            }
        }
        if let Some(meter) = self.meter {
            if let Err(err) = meter.shutdown() {
                error!("Error shutting down meter provider: {:?}", err);
            }
        }
    }
}

pub fn get_env_filter() -> tracing_subscriber::EnvFilter {
    // RUST_LOG used to control logging level.
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    })
}

pub fn get_log_layer<S>(config: &ServerConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    S: tracing::Subscriber,
{
    if config.structured_logging {
        return Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(false)
                .with_current_span(true)
                .flatten_event(true),
        );
    }

    Box::new(tracing_subscriber::fmt::layer().compact())
}

pub fn setup_tracing(config: &ServerConfig) -> Result<TelemetryProviders> {
    let mut providers = TelemetryProviders::default();

    if config.telemetry.enable_tracing {
        let mut span_exporter = SpanExporter::builder().with_tonic();
        if let Some(endpoint) = &config.telemetry.endpoint {
            span_exporter = span_exporter.with_endpoint(endpoint.clone());
        }
        let tracer_provider = TracerProviderBuilder::default()
            .with_batch_exporter(span_exporter.build()?)
            .build();
        global::set_tracer_provider(tracer_provider.clone());
        providers.tracer = Some(tracer_provider);
    }

    if config.telemetry.enable_metrics {
        let mut metric_exporter = MetricExporter::builder().with_tonic();
        if let Some(endpoint) = &config.telemetry.endpoint {
            metric_exporter = metric_exporter.with_endpoint(endpoint.clone());
        }
        let meter_provider = SdkMeterProvider::builder()
            .with_periodic_exporter(metric_exporter.build()?)
            .build();
        global::set_meter_provider(meter_provider.clone());
        providers.meter = Some(meter_provider);
    }

    let subscriber = tracing_subscriber::Registry::default()
        .with(get_log_layer(config).with_filter(get_env_filter()))
        .with(providers.tracer.as_ref().map(|provider| {
            tracing_opentelemetry::layer()
                .with_tracer(provider.tracer("imgdrop-server"))
                .with_filter(get_env_filter())
        }));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        error!("logger was already initiated, continuing: {:?}", e);
    }

    Ok(providers)
}
