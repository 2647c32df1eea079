//! Capabilities of the built-in services and the keys they are bound under.
//!
//! Handlers resolve them through the container:
//!
//! ```rust,ignore
//! let log = ctx.make_as::<dyn Log>(LOG_KEY)?;
//! log.info("user created", fields! { "id" => id });
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde_json::Value;
use spire_core::BoxError;

pub use crate::config::LogLevel;

/// Key of the [`App`] service.
pub const APP_KEY: &str = "app";
/// Key of the [`Config`] service.
pub const CONFIG_KEY: &str = "config";
/// Key of the [`Log`] service.
pub const LOG_KEY: &str = "log";

/// Application identity and folders.
pub trait App: Send + Sync {
    /// Application name.
    fn name(&self) -> &str;
    /// Root folder of the application.
    fn base_folder(&self) -> &Path;
    /// Folder for log files.
    fn log_folder(&self) -> &Path;
}

/// Dotted-key access to the merged configuration.
///
/// Every getter returns `None` when the key is absent or cannot be read as
/// the requested type, leaving the default to the caller.
pub trait Config: Send + Sync {
    /// Returns `true` if `key` (e.g. `log.folder`) is present.
    fn is_exist(&self, key: &str) -> bool;
    /// The raw value at `key`.
    fn get(&self, key: &str) -> Option<Value>;
    /// A string, or a number or boolean rendered as one.
    fn get_string(&self, key: &str) -> Option<String>;
    /// A boolean, also accepting `"true"` / `"false"`.
    fn get_bool(&self, key: &str) -> Option<bool>;
    /// An integer, also accepting a numeric string.
    fn get_int(&self, key: &str) -> Option<i64>;
}

/// Structured fields attached to a log record.
pub type Fields = serde_json::Map<String, Value>;

/// Supplies fields added to every record, such as the host name.
pub type CtxFielder = Arc<dyn Fn() -> Fields + Send + Sync>;

/// One record, as handed to a [`Formatter`].
#[derive(Debug, Clone)]
pub struct Record<'a> {
    pub level: LogLevel,
    pub time: DateTime<Local>,
    pub message: &'a str,
    pub fields: &'a Fields,
}

/// Renders a record into the bytes of one line, including the newline.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &Record<'_>) -> Result<Vec<u8>, BoxError>;
}

/// The application log.
pub trait Log: Send + Sync {
    /// Records below this level are dropped.
    fn level(&self) -> LogLevel;

    /// Writes one record.
    fn log(&self, level: LogLevel, message: &str, fields: Fields);

    fn trace(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Trace, message, fields);
    }

    fn debug(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Error, message, fields);
    }
}

/// Builds [`Fields`] from `key => value` pairs.
///
/// ```rust,ignore
/// log.info("login", fields! { "user" => "ana", "attempt" => 2 });
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::contract::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::contract::Fields::new();
        $(fields.insert(($key).to_string(), $crate::__private::serde_json::json!($value));)+
        fields
    }};
}
