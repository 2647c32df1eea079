//! Line formatters for the `log` service.

use std::sync::Arc;

use serde_json::Value;
use spire_core::BoxError;

use crate::contract::{Formatter, Record};

/// `2026-10-17T09:30:00.123+02:00  [info]  message  {"key":"value"}`
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format(&self, record: &Record<'_>) -> Result<Vec<u8>, BoxError> {
        let mut line = format!(
            "{}\t[{}]\t{}",
            record.time.to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
            record.level,
            record.message
        );
        if !record.fields.is_empty() {
            line.push('\t');
            line.push_str(&serde_json::to_string(record.fields)?);
        }
        line.push('\n');
        Ok(line.into_bytes())
    }
}

/// One JSON object per line with `time`, `level` and `msg` next to the
/// record fields. Record fields never override the three reserved keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, record: &Record<'_>) -> Result<Vec<u8>, BoxError> {
        let mut object = record.fields.clone();
        object.insert(
            "time".to_string(),
            Value::String(record.time.to_rfc3339_opts(chrono::SecondsFormat::Millis, false)),
        );
        object.insert("level".to_string(), Value::String(record.level.to_string()));
        object.insert("msg".to_string(), Value::String(record.message.to_string()));

        let mut line = serde_json::to_vec(&object)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Picks a formatter by name: `json`, anything else is text.
pub fn formatter_by_name(name: &str) -> Arc<dyn Formatter> {
    match name.to_ascii_lowercase().as_str() {
        "json" => Arc::new(JsonFormatter),
        _ => Arc::new(TextFormatter),
    }
}
