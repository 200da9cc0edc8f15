//! Configuration module

use std::env;
use std::path::Path;

use flowsense_core::PipelineConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Classification pipeline settings
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `FLOWSENSE_CONFIG` may point at a JSON pipeline config; otherwise the
    /// pipeline reads its own `FLOWSENSE_*` variables.
    pub fn from_env() -> Self {
        let pipeline = match env::var("FLOWSENSE_CONFIG").ok().filter(|p| !p.is_empty()) {
            Some(path) => PipelineConfig::from_file(Path::new(&path)).unwrap_or_else(|e| {
                tracing::warn!("Ignoring {}: {}, using environment", path, e);
                PipelineConfig::from_env()
            }),
            None => PipelineConfig::from_env(),
        };

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),

            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),

            pipeline,
        }
    }
}
