use crate::capture::MAX_BODY;
use crate::trace::DEFAULT_ENVIRONMENT;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const HEALTHZ_PATH: &str = "/healthz";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub listen: String,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default)]
    pub server_port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: 0,
            environment: default_environment(),
            max_body_bytes: default_max_body_bytes(),
            trust_forwarded_headers: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    pub traces_per_minute: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_true")]
    pub to_stdout: bool,
    #[serde(default)]
    pub file: Option<LogFileConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            to_stdout: true,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub dir: String,
    #[serde(default = "default_log_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("missing environment variable `{0}`")]
    MissingEnvVar(String),
    #[error("config validation error: {0}")]
    Validation(String),
}

impl AppConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(yaml)?;
        let config: Self = serde_yaml::from_str(&interpolated)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "`listen` must not be empty".to_string(),
            ));
        }

        self.capture.validate()?;

        if self.sampling.traces_per_minute == 0 {
            return Err(ConfigError::Validation(
                "`sampling.traces_per_minute` must be > 0".to_string(),
            ));
        }

        if let Some(observability) = &self.observability {
            let metrics = &observability.metrics;
            if metrics.enabled && !metrics.path.starts_with('/') {
                return Err(ConfigError::Validation(
                    "`observability.metrics.path` must start with `/`".to_string(),
                ));
            }

            if metrics.enabled && metrics.path == HEALTHZ_PATH {
                return Err(ConfigError::Validation(format!(
                    "`observability.metrics.path` must not be `{HEALTHZ_PATH}`"
                )));
            }

            if let Some(file) = &observability.logging.file
                && file.enabled
            {
                if file.dir.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "`observability.logging.file.dir` must not be empty".to_string(),
                    ));
                }
                if file.max_files == 0 {
                    return Err(ConfigError::Validation(
                        "`observability.logging.file.max_files` must be > 0".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "`capture.server_host` must not be empty".to_string(),
            ));
        }

        if self.environment.trim().is_empty() {
            return Err(ConfigError::Validation(
                "`capture.environment` must not be empty".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "`capture.max_body_bytes` must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(rel_start) = input[cursor..].find("${") {
        let start = cursor + rel_start;
        out.push_str(&input[cursor..start]);

        let key_start = start + 2;
        let rel_end = input[key_start..].find('}').ok_or_else(|| {
            ConfigError::Validation("unterminated `${...}` expression".to_string())
        })?;
        let end = key_start + rel_end;
        let key = &input[key_start..end];

        if key.is_empty() {
            return Err(ConfigError::Validation(
                "empty environment variable name in `${}`".to_string(),
            ));
        }

        let value = env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
        out.push_str(&value);
        cursor = end + 1;
    }

    out.push_str(&input[cursor..]);
    Ok(out)
}

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "localhost".to_string()
}

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

fn default_max_body_bytes() -> usize {
    MAX_BODY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_prefix() -> String {
    "metlo-capture.log".to_string()
}

fn default_max_files() -> usize {
    7
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
