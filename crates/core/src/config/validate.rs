use super::{types::Config, ConfigError};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.orchestrator.max_retry_count == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_retry_count must be greater than 0".to_string(),
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.exclusive_retry_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.exclusive_retry_interval_secs must be greater than 0".to_string(),
        ));
    }
    if scheduler.data_repair_hour >= 24 {
        return Err(ConfigError::ValidationError(format!(
            "scheduler.data_repair_hour must be below 24, got {}",
            scheduler.data_repair_hour
        )));
    }
    if scheduler.data_repair_minute >= 60 {
        return Err(ConfigError::ValidationError(format!(
            "scheduler.data_repair_minute must be below 60, got {}",
            scheduler.data_repair_minute
        )));
    }

    if let Some(ref pipeline) = config.pipeline {
        if pipeline.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "pipeline.url cannot be empty".to_string(),
            ));
        }
        if !pipeline.url.starts_with("http://") && !pipeline.url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.url must be an http(s) URL, got {}",
                pipeline.url
            )));
        }
    }

    Ok(())
}
