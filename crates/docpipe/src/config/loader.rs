use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Supported config encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Picks the format from the file extension; anything but `.yaml`/`.yml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Json,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str_as(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    load_config_from_str_as(content, ConfigFormat::Json)
}

pub fn load_config_from_str_as(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config: Config = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Validate version
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be greater than 0"));
    }

    let runner = &config.runner;
    if runner.unit_timeout_secs == 0 {
        return Err(invalid("runner.unit_timeout_secs must be greater than 0"));
    }
    if runner.attempt_deadline_secs == Some(0) {
        return Err(invalid("runner.attempt_deadline_secs must be greater than 0"));
    }
    if let Some(ratio) = runner.max_failure_ratio {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid(format!(
                "runner.max_failure_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
    }

    let queue = &config.queue;
    if queue.visibility_timeout_secs == 0 {
        return Err(invalid("queue.visibility_timeout_secs must be greater than 0"));
    }
    if queue.poll_interval_ms == 0 {
        return Err(invalid("queue.poll_interval_ms must be greater than 0"));
    }
    if queue.max_deliveries == 0 {
        return Err(invalid("queue.max_deliveries must be greater than 0"));
    }
    let retry = &queue.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("queue.retry.max_attempts must be greater than 0"));
    }
    if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
        return Err(invalid("queue.retry.multiplier must be at least 1.0"));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(invalid(
            "queue.retry.max_delay_ms must not be lower than base_delay_ms",
        ));
    }

    validate_thresholds(config)?;

    if config.stream.log_capacity == 0
        || config.stream.max_frame_bytes == 0
        || config.stream.channel_capacity == 0
    {
        return Err(invalid("stream capacities must be greater than 0"));
    }
    if config.job.log_capacity == 0 {
        return Err(invalid("job.log_capacity must be greater than 0"));
    }

    Ok(())
}

fn validate_thresholds(config: &Config) -> Result<(), ConfigError> {
    let thresholds = &config.progress.thresholds;
    if thresholds.is_empty() {
        return Err(invalid("progress.thresholds must not be empty"));
    }

    let mut seen = HashSet::new();
    let mut previous: Option<u8> = None;
    for threshold in thresholds {
        if !seen.insert(threshold.stage.as_str()) {
            return Err(invalid(format!(
                "Duplicate progress threshold for stage '{}'",
                threshold.stage
            )));
        }
        if threshold.progress > 100 {
            return Err(invalid(format!(
                "Progress threshold for '{}' exceeds 100",
                threshold.stage
            )));
        }
        if let Some(prev) = previous {
            if threshold.progress <= prev {
                return Err(invalid(format!(
                    "Progress thresholds must be strictly increasing ('{}' = {})",
                    threshold.stage, threshold.progress
                )));
            }
        }
        previous = Some(threshold.progress);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/docpipe/jobs.db",
            "worker_count": 4,
            "runner": {
                "unit_timeout_secs": 30,
                "max_failure_ratio": 0.5
            },
            "queue": {
                "retry": { "base_delay_ms": 10, "max_delay_ms": 100 }
            }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.runner.unit_timeout_secs, 30);
        assert_eq!(config.runner.max_failure_ratio, Some(0.5));
        assert_eq!(config.queue.retry.max_delay_ms, 100);
        assert_eq!(
            config.database_path.as_deref(),
            Some("/var/lib/docpipe/jobs.db")
        );
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docpipe.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "version: \"1.0\"\nworker_count: 2\nlogging:\n  level: debug\n  format: json\n"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{"version":"2.0"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_failure_ratio() {
        let result = load_config_from_str(
            r#"{"version":"1.0","runner":{"max_failure_ratio":1.5}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_zero_unit_timeout() {
        let result = load_config_from_str(r#"{"version":"1.0","runner":{"unit_timeout_secs":0}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_thresholds_must_increase() {
        let result = load_config_from_str(
            r#"{"version":"1.0","progress":{"thresholds":[
                {"stage":"downloading","progress":10},
                {"stage":"processing","progress":10}
            ]}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_threshold_stage() {
        let result = load_config_from_str(
            r#"{"version":"1.0","progress":{"thresholds":[
                {"stage":"processing","progress":10},
                {"stage":"processing","progress":20}
            ]}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YAML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Json);
    }
}
