use crate::config::{LogFileConfig, LogFormat, LogRotation, LoggingConfig, ObservabilityConfig};
use http::StatusCode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::fs;
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

type FileLogWriter = (
    Option<tracing_appender::non_blocking::NonBlocking>,
    Option<tracing_appender::non_blocking::WorkerGuard>,
);

#[derive(Debug)]
pub struct CaptureMetrics {
    registry: RwLock<Registry>,
    traces_sampled: Counter,
    traces_dropped: Counter,
    traces_dispatched: Family<StatusClassLabels, Counter>,
    capture_truncated: Counter,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        let traces_sampled = Counter::default();
        let traces_dropped = Counter::default();
        let traces_dispatched = Family::<StatusClassLabels, Counter>::default();
        let capture_truncated = Counter::default();

        let mut registry = Registry::default();
        registry.register(
            "metlo_traces_sampled",
            "Requests admitted by the sampling gate.",
            traces_sampled.clone(),
        );
        registry.register(
            "metlo_traces_dropped",
            "Requests rejected by the sampling gate.",
            traces_dropped.clone(),
        );
        registry.register(
            "metlo_traces_dispatched",
            "Traces handed to the sink.",
            traces_dispatched.clone(),
        );
        registry.register(
            "metlo_capture_truncated",
            "Captured response bodies cut at the capture limit.",
            capture_truncated.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            traces_sampled,
            traces_dropped,
            traces_dispatched,
            capture_truncated,
        }
    }

    pub fn observe_sampled(&self) {
        self.traces_sampled.inc();
    }

    pub fn observe_dropped(&self) {
        self.traces_dropped.inc();
    }

    pub fn observe_truncated(&self) {
        self.capture_truncated.inc();
    }

    pub fn observe_dispatched(&self, status: StatusCode) {
        self.traces_dispatched
            .get_or_create(&StatusClassLabels {
                status_class: format!("{}xx", status.as_u16() / 100),
            })
            .inc();
    }

    pub fn sampled(&self) -> u64 {
        self.traces_sampled.get()
    }

    pub fn dropped(&self) -> u64 {
        self.traces_dropped.get()
    }

    pub fn truncated(&self) -> u64 {
        self.capture_truncated.get()
    }

    pub fn encode(&self) -> String {
        let mut output = String::new();
        if let Ok(registry) = self.registry.read() {
            let _ = encode(&mut output, &registry);
        }
        output
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StatusClassLabels {
    status_class: String,
}

pub fn init_tracing(config: Option<&ObservabilityConfig>) -> Result<(), String> {
    static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();
    static FILE_LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
    if TRACING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let logging = config
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    let env_filter = EnvFilter::try_new(logging.level.trim()).map_err(|err| {
        format!(
            "invalid `observability.logging.level` value `{}`: {err}",
            logging.level
        )
    })?;
    let (file_writer, file_guard) = build_file_log_writer(&logging)?;
    if let Some(guard) = file_guard {
        let _ = FILE_LOG_GUARD.set(guard);
    }

    let init_result = match logging.format {
        LogFormat::Json => {
            let stdout_layer = logging.to_stdout.then(|| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
            });
            let file_layer = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(writer)
            });

            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer),
            )
        }
        LogFormat::Text => {
            let stdout_layer = logging.to_stdout.then(tracing_subscriber::fmt::layer);
            let file_layer = file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
            });

            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer),
            )
        }
    };

    init_result.map_err(|err| format!("failed to initialize tracing subscriber: {err}"))?;

    let _ = TRACING_INITIALIZED.set(());
    Ok(())
}

fn build_file_log_writer(logging: &LoggingConfig) -> Result<FileLogWriter, String> {
    let Some(file) = &logging.file else {
        return Ok((None, None));
    };
    if !file.enabled {
        return Ok((None, None));
    }

    let dir = file.dir.trim();
    fs::create_dir_all(dir)
        .map_err(|err| format!("failed to create log directory `{dir}`: {err}"))?;
    prune_old_log_files(file)?;

    let appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_rotation(file.rotation.clone()),
        dir,
        file.prefix.trim(),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((Some(writer), Some(guard)))
}

fn tracing_rotation(rotation: LogRotation) -> tracing_appender::rolling::Rotation {
    match rotation {
        LogRotation::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    }
}

fn prune_old_log_files(file: &LogFileConfig) -> Result<(), String> {
    let prefix = file.prefix.trim();
    let dir = file.dir.trim();
    let entries =
        fs::read_dir(dir).map_err(|err| format!("failed to read log directory `{dir}`: {err}"))?;

    let mut candidates: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| format!("failed to inspect log file entry: {err}"))?;
        let file_type = entry
            .file_type()
            .map_err(|err| format!("failed to inspect log file type: {err}"))?;
        if !file_type.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        if !file_name.starts_with(prefix) {
            continue;
        }

        let modified = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((entry.path(), modified));
    }

    candidates.sort_by(|left, right| right.1.cmp(&left.1));
    for (path, _) in candidates.into_iter().skip(file.max_files) {
        fs::remove_file(&path)
            .map_err(|err| format!("failed to remove old log file `{}`: {err}", path.display()))?;
    }
    Ok(())
}
