//! Tracing subscriber initialization.

use crate::PlatformError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to output JSON format
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "rust-service".to_string(),
            log_level: "info".to_string(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    /// Read `LOG_LEVEL` and `LOG_JSON` from the environment.
    #[must_use]
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let mut config = Self::default().with_service_name(service_name);
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.trim().is_empty() {
                config.log_level = level;
            }
        }
        config.json_output = std::env::var("LOG_JSON")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config
    }

    /// Set the service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Install the global tracing subscriber.
///
/// Should be called once at application startup. `RUST_LOG` takes
/// precedence over the configured level.
///
/// # Errors
///
/// Returns [`PlatformError::InvalidInput`] for an unparsable level and
/// [`PlatformError::Internal`] if a global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), PlatformError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| PlatformError::invalid_input(format!("log level: {e}")))?,
    };

    let installed = if config.json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    installed.map_err(|e| PlatformError::internal(e.to_string()))?;

    tracing::info!(service = %config.service_name, "Tracing initialized");
    Ok(())
}
