//! INI file configuration adapter.

use crate::domain::error::MarginError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MarginError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| MarginError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, MarginError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| MarginError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[sqlite]
path = /var/lib/twmargin/margin.db

[metrics]
window_policy = strict

[backtest]
start_date = 20240101
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("sqlite", "path"),
            Some("/var/lib/twmargin/margin.db".to_string())
        );
        assert_eq!(
            adapter.get_string("metrics", "window_policy"),
            Some("strict".to_string())
        );
        assert_eq!(
            adapter.get_string("backtest", "start_date"),
            Some("20240101".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nstop_loss = 0.1\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_value_or_default() {
        let adapter =
            FileConfigAdapter::from_string("[metrics]\nratio_window = 10\nbalance_window = abc\n")
                .unwrap();
        assert_eq!(adapter.get_int("metrics", "ratio_window", 0), 10);
        assert_eq!(adapter.get_int("metrics", "balance_window", 5), 5);
        assert_eq!(adapter.get_int("metrics", "missing", 42), 42);
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[signal]\nvolume_comparison = below\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("signal", "volume_comparison"),
            Some("below".to_string())
        );
    }

    #[test]
    fn from_file_missing_file_is_config_parse_error() {
        match FileConfigAdapter::from_file("/nonexistent/path/config.ini") {
            Err(MarginError::ConfigParse { file, .. }) => {
                assert_eq!(file, "/nonexistent/path/config.ini")
            }
            Err(other) => panic!("expected ConfigParse, got {other:?}"),
            Ok(_) => panic!("expected error"),
        }
    }
}
