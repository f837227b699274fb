//! Console and file logging through `tracing`.
//!
//! Settings come from `LOG_LEVEL`, `LOG_FORMAT` (`text` or `json`),
//! `LOG_OUTPUT` (`console`, `file` or `both`) and `LOG_FILE`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigError;
use crate::constants::DEFAULT_LOG_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    Console,
    File,
    #[default]
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            other => Err(format!("invalid log output '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `meta_ads_loader=debug,reqwest=warn`.
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Both,
            file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            EnvFilter::try_new(&level).map_err(|e| ConfigError::Invalid {
                name: "LOG_LEVEL".to_string(),
                reason: e.to_string(),
            })?;
            settings.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            settings.format = format.parse().map_err(|reason| ConfigError::Invalid {
                name: "LOG_FORMAT".to_string(),
                reason,
            })?;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            settings.output = output.parse().map_err(|reason| ConfigError::Invalid {
                name: "LOG_OUTPUT".to_string(),
                reason,
            })?;
        }
        if let Ok(file) = std::env::var("LOG_FILE") {
            settings.file = PathBuf::from(file);
        }

        Ok(settings)
    }
}

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(&settings.level)?;
    let json = settings.format == LogFormat::Json;

    let console = settings.output.console().then(|| {
        let layer = fmt::layer().with_writer(std::io::stdout);
        if json {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    });

    let mut guard = None;
    let file = if settings.output.file() {
        let (dir, name) = split_log_path(&settings.file);
        std::fs::create_dir_all(&dir)?;
        let (writer, file_guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        guard = Some(file_guard);

        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        Some(if json { layer.json().boxed() } else { layer.boxed() })
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(guard)
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    (dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_outputs_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("stdout".parse::<LogOutput>(), Ok(LogOutput::Console));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        let (dir, name) = split_log_path(Path::new("meta_ads.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, PathBuf::from("meta_ads.log"));

        let (dir, _) = split_log_path(Path::new("/var/log/ads/run.log"));
        assert_eq!(dir, PathBuf::from("/var/log/ads"));
    }
}
