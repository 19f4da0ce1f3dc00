use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_level: String,
    pub jaeger_endpoint: Option<String>,
    pub enable_jaeger: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "order-service".to_string(),
            log_level: "info".to_string(),
            jaeger_endpoint: None,
            enable_jaeger: false,
        }
    }
}

impl TelemetryConfig {
    /// Telemetry settings taken from the loaded application configuration
    pub fn from_app(config: &AppConfig, service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            log_level: config.log_level.clone(),
            jaeger_endpoint: config.jaeger_endpoint.clone(),
            enable_jaeger: config.enable_jaeger,
        }
    }
}

/// Flushes and shuts down the tracer provider when dropped
#[must_use = "telemetry is shut down as soon as the guard is dropped"]
pub struct TelemetryGuard {
    jaeger: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.jaeger {
            global::shutdown_tracer_provider();
        }
    }
}

/// Install the global JSON log subscriber, with Jaeger export when enabled
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .json();

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if config.enable_jaeger {
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(&config.service_name)
            .with_endpoint(
                config
                    .jaeger_endpoint
                    .clone()
                    .unwrap_or_else(|| "localhost:6831".to_string()),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }

    tracing::info!(
        service = %config.service_name,
        jaeger = config.enable_jaeger,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        jaeger: config.enable_jaeger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "order-service");
        assert_eq!(config.log_level, "info");
        assert!(!config.enable_jaeger);
    }

    #[test]
    fn test_telemetry_config_from_app() {
        let app = AppConfig {
            log_level: "warn".to_string(),
            enable_jaeger: true,
            jaeger_endpoint: Some("jaeger:6831".to_string()),
            ..Default::default()
        };

        let config = TelemetryConfig::from_app(&app, "order-service");

        assert_eq!(config.service_name, "order-service");
        assert_eq!(config.log_level, "warn");
        assert!(config.enable_jaeger);
        assert_eq!(config.jaeger_endpoint.as_deref(), Some("jaeger:6831"));
    }

    #[test]
    fn test_second_init_is_rejected() {
        let first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        // Only one global subscriber may be installed per process
        assert!(first.is_err() || second.is_err());
    }
}
