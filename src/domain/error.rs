//! Domain error types.

/// Top-level error type for twmargin.
#[derive(Debug, thiserror::Error)]
pub enum MarginError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid trade date {value:?}: expected YYYYMMDD")]
    InvalidDate { value: String },

    #[error("invalid input in {source_name}: {reason}")]
    InvalidInput { source_name: String, reason: String },

    #[error("no data for {what} between {start} and {end}")]
    NoData {
        what: String,
        start: String,
        end: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MarginError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        MarginError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_missing(section: &str, key: &str) -> Self {
        MarginError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&MarginError> for std::process::ExitCode {
    fn from(err: &MarginError) -> Self {
        let code: u8 = match err {
            MarginError::Io(_) => 1,
            MarginError::ConfigParse { .. }
            | MarginError::ConfigMissing { .. }
            | MarginError::ConfigInvalid { .. }
            | MarginError::InvalidDate { .. } => 2,
            MarginError::Database { .. } | MarginError::DatabaseQuery { .. } => 3,
            MarginError::InvalidInput { .. } => 4,
            MarginError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_helpers_fill_fields() {
        match MarginError::config_invalid("backtest", "stop_loss", "must be positive") {
            MarginError::ConfigInvalid {
                section,
                key,
                reason,
            } => {
                assert_eq!(section, "backtest");
                assert_eq!(key, "stop_loss");
                assert_eq!(reason, "must be positive");
            }
            other => panic!("unexpected variant: {other}"),
        }
    }

    #[test]
    fn display_messages() {
        let err = MarginError::InvalidDate {
            value: "2024-01-02".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid trade date \"2024-01-02\": expected YYYYMMDD"
        );
        let err = MarginError::config_missing("sqlite", "path");
        assert_eq!(err.to_string(), "missing config key [sqlite] path");
    }
}
