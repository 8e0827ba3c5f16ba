use anyhow::Context;
use opentelemetry_sdk::trace::Tracer;
use tracing::{Subscriber, level_filters::LevelFilter};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
  Registry, layer::SubscriberExt, registry::LookupSpan,
  util::SubscriberInitExt,
};
use warden_client::entities::logger::{LogConfig, StdioLogMode};

mod otel;

/// Optional OTLP export layer. Option<Layer> implements
/// Layer, so it attaches uniformly across the stdio modes.
fn otel_layer<S>(
  config: &LogConfig,
) -> Option<OpenTelemetryLayer<S, Tracer>>
where
  S: Subscriber + for<'span> LookupSpan<'span>,
{
  (!config.otlp_endpoint.is_empty()).then(|| {
    OpenTelemetryLayer::new(otel::tracer(
      &config.otlp_endpoint,
      config.opentelemetry_service_name.clone(),
    ))
  })
}

pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let log_level: tracing::Level = config.level.into();

  let registry =
    Registry::default().with(LevelFilter::from(log_level));

  match config.stdio {
    StdioLogMode::Standard if config.pretty => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false),
      )
      .with(otel_layer(config))
      .try_init(),
    StdioLogMode::Standard => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false),
      )
      .with(otel_layer(config))
      .try_init(),
    StdioLogMode::Json => registry
      .with(tracing_subscriber::fmt::layer().json())
      .with(otel_layer(config))
      .try_init(),
    StdioLogMode::None
      if !config.otlp_endpoint.is_empty() =>
    {
      registry.with(otel_layer(config)).try_init()
    }
    StdioLogMode::None => return Ok(()),
  }
  .context("failed to init logger")
}
