//! Logging configuration

use std::env;

/// Subscriber output style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a developer terminal
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
    Compact,
}

impl LogFormat {
    /// Unknown names fall back to `Pretty`.
    fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else if name.eq_ignore_ascii_case("compact") {
            Self::Compact
        } else {
            Self::Pretty
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

/// Default directive: our own crate and the HTTP trace layer at `info`
pub const DEFAULT_LOG_FILTER: &str = "taskgate=info,tower_http=info";

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// `LOG_FORMAT` picks the style; `RUST_LOG` overrides the filter.
    pub fn from_env() -> Self {
        Self::from_vars(env::var("LOG_FORMAT").ok(), env::var("RUST_LOG").ok())
    }

    fn from_vars(format: Option<String>, filter: Option<String>) -> Self {
        Self {
            log_format: format.as_deref().map(LogFormat::from_name).unwrap_or_default(),
            log_filter: filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(LogFormat::from_name("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::from_name("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_from_vars() {
        let config = ObservabilityConfig::from_vars(Some("json".into()), Some("debug".into()));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_filter, "debug");

        let config = ObservabilityConfig::from_vars(None, Some("  ".into()));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }
}
