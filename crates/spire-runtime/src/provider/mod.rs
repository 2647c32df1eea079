//! Built-in service providers.
//!
//! | Key      | Provider           | Capability      |
//! |----------|--------------------|-----------------|
//! | `app`    | [`AppProvider`]    | `dyn App`       |
//! | `config` | [`ConfigProvider`] | `dyn Config`    |
//! | `log`    | [`LogProvider`]    | `dyn Log`       |

pub mod app;
pub mod config;
pub mod formatter;
pub mod log;

pub use app::{AppProvider, SpireApp};
pub use config::{ConfigProvider, SpireConfigService};
pub use formatter::{JsonFormatter, TextFormatter, formatter_by_name};
pub use log::{LogProvider, SingleLog};
