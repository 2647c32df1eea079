//! The `log` service: a single append-only log file.
//!
//! Constructor parameters, in order:
//!
//! | # | Type                 | Default                                 |
//! |---|----------------------|-----------------------------------------|
//! | 0 | [`LogLevel`]         | `log.level`, else `info`                |
//! | 1 | [`CtxFielder`]       | no extra fields                         |
//! | 2 | `Arc<dyn Formatter>` | `log.formatter` (`text` / `json`), else text |
//!
//! The destination is `<folder>/<file>`: the folder is `log.folder` when
//! configured and the application log folder otherwise; the file is
//! `log.file` when configured and `.log` otherwise. The folder is created
//! when missing and the file is opened for appending.
//!
//! Use `make_new` to get a log with different parameters without touching
//! the shared instance:
//!
//! ```rust,ignore
//! let audit = container.make_new(
//!     LOG_KEY,
//!     ServiceParams::new().with(LogLevel::Debug),
//! )?;
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use spire_core::{BoxError, Container, Service, ServiceParams, ServiceProvider};
use tracing::{debug, warn};

use super::formatter::{TextFormatter, formatter_by_name};
use crate::contract::{
    APP_KEY, App, CONFIG_KEY, Config, CtxFielder, Fields, Formatter, LOG_KEY, Log, LogLevel,
    Record,
};

/// File name used when `log.file` is not configured.
pub const DEFAULT_LOG_FILE: &str = ".log";

/// A log writing every record to one file.
pub struct SingleLog {
    level: LogLevel,
    ctx_fielder: CtxFielder,
    formatter: Arc<dyn Formatter>,
    path: PathBuf,
    out: Mutex<File>,
}

impl SingleLog {
    /// Opens `<folder>/<file>` for appending, creating the folder if needed.
    pub fn open(
        folder: &Path,
        file: &str,
        level: LogLevel,
        ctx_fielder: CtxFielder,
        formatter: Arc<dyn Formatter>,
    ) -> std::io::Result<Self> {
        if !folder.exists() {
            fs::create_dir_all(folder)?;
        }
        let path = folder.join(file);
        let out = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), level = %level, "Log file opened");

        Ok(Self {
            level,
            ctx_fielder,
            formatter,
            path,
            out: Mutex::new(out),
        })
    }

    /// The file records are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SingleLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleLog")
            .field("level", &self.level)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Log for SingleLog {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn log(&self, level: LogLevel, message: &str, fields: Fields) {
        if level < self.level {
            return;
        }

        let mut merged = (self.ctx_fielder)();
        merged.extend(fields);

        let record = Record {
            level,
            time: Local::now(),
            message,
            fields: &merged,
        };
        let line = match self.formatter.format(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Failed to format log record");
                return;
            }
        };

        if let Err(err) = self.out.lock().write_all(&line) {
            warn!(path = %self.path.display(), error = %err, "Failed to write log record");
        }
    }
}

/// Binds [`SingleLog`] under `log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProvider;

impl ServiceProvider for LogProvider {
    fn name(&self) -> &str {
        LOG_KEY
    }

    fn params(&self, container: &Container) -> ServiceParams {
        let config = container.make_as::<dyn Config>(CONFIG_KEY).ok();
        let setting = |key: &str| config.as_ref().and_then(|c| c.get_string(key));

        let level = setting("log.level")
            .and_then(|level| level.parse::<LogLevel>().ok())
            .unwrap_or_default();
        let ctx_fielder: CtxFielder = Arc::new(Fields::new);
        let formatter = setting("log.formatter")
            .map(|name| formatter_by_name(&name))
            .unwrap_or_else(|| Arc::new(TextFormatter) as Arc<dyn Formatter>);

        ServiceParams::new()
            .with(level)
            .with(ctx_fielder)
            .with(formatter)
    }

    fn register(&self, container: &Container, params: &ServiceParams) -> Result<Service, BoxError> {
        let level = *params.get::<LogLevel>(0)?;
        let ctx_fielder = params.get::<CtxFielder>(1)?.clone();
        let formatter = params.get::<Arc<dyn Formatter>>(2)?.clone();

        let app = container.make_as::<dyn App>(APP_KEY)?;
        let config = container.make_as::<dyn Config>(CONFIG_KEY)?;

        let folder = config
            .get_string("log.folder")
            .map(PathBuf::from)
            .unwrap_or_else(|| app.log_folder().to_path_buf());
        let file = config
            .get_string("log.file")
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());

        let log = SingleLog::open(&folder, &file, level, ctx_fielder, formatter)
            .map_err(|err| format!("open log file {}: {err}", folder.join(&file).display()))?;
        Ok(Service::new(Arc::new(log) as Arc<dyn Log>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::fields;
    use crate::provider::app::AppProvider;
    use crate::provider::config::ConfigProvider;
    use crate::provider::formatter::JsonFormatter;
    use serde_json::json;

    fn container(base: &Path, log: serde_json::Value) -> Container {
        let container = Container::new();
        container
            .bind(AppProvider::new(AppConfig {
                base_folder: Some(base.to_path_buf()),
                ..AppConfig::default()
            }))
            .unwrap();
        container
            .bind(ConfigProvider::new(json!({ "log": log })))
            .unwrap();
        container.bind(LogProvider).unwrap();
        container
    }

    #[test]
    fn writes_to_app_log_folder_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(dir.path(), json!({}));

        let log = container.make_as::<dyn Log>(LOG_KEY).unwrap();
        log.info("started", fields! { "port" => 8080 });
        log.debug("dropped", fields!());

        let path = dir.path().join("storage").join("log").join(DEFAULT_LOG_FILE);
        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("[info]\tstarted\t{\"port\":8080}"));
    }

    #[test]
    fn honours_configured_folder_file_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("custom");
        let container = container(
            dir.path(),
            json!({ "folder": folder, "file": "app.log", "level": "warn", "formatter": "json" }),
        );

        let log = container.make_as::<dyn Log>(LOG_KEY).unwrap();
        assert_eq!(log.level(), LogLevel::Warn);
        log.info("ignored", fields!());
        log.error("failed", fields! { "code" => 7 });

        let contents = fs::read_to_string(folder.join("app.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["msg"], "failed");
        assert_eq!(line["code"], 7);
    }

    #[test]
    fn appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(dir.path(), json!({ "folder": dir.path() }));

        container.make_as::<dyn Log>(LOG_KEY).unwrap().warn("one", fields!());
        let fresh = container
            .make_new(LOG_KEY, ServiceParams::new())
            .unwrap()
            .get::<dyn Log>()
            .unwrap();
        fresh.warn("two", fields!());

        let contents = fs::read_to_string(dir.path().join(DEFAULT_LOG_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn make_new_overrides_params_without_touching_the_singleton() {
        let dir = tempfile::tempdir().unwrap();
        let container = container(dir.path(), json!({ "folder": dir.path() }));

        let shared = container.make(LOG_KEY).unwrap();
        let fielder: CtxFielder = Arc::new(|| fields! { "request_id" => "r-1" });
        let custom = container
            .make_new(
                LOG_KEY,
                ServiceParams::new()
                    .with(LogLevel::Trace)
                    .with(fielder)
                    .with(Arc::new(JsonFormatter) as Arc<dyn Formatter>),
            )
            .unwrap();

        assert!(!custom.ptr_eq(&shared));
        assert!(container.make(LOG_KEY).unwrap().ptr_eq(&shared));

        let custom = custom.get::<dyn Log>().unwrap();
        assert_eq!(custom.level(), LogLevel::Trace);
        custom.trace("traced", fields!());

        let contents = fs::read_to_string(dir.path().join(DEFAULT_LOG_FILE)).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["request_id"], "r-1");
        assert_eq!(line["level"], "trace");
    }

    #[test]
    fn missing_app_service_fails_construction() {
        let container = Container::new();
        container.bind(LogProvider).unwrap();
        assert!(container.make(LOG_KEY).is_err());
    }
}
