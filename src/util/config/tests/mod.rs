//! Runtime configuration tests

use std::collections::HashMap;
use std::io::Write;

use crate::util::config::{ConfigError, RuntimeConfig, ENV_LOG, ENV_NUM_WORKERS};
use crate::util::logger::LogLevel;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.log.level, LogLevel::Info);
        assert!(!config.scheduler.single_threaded);
    }

    #[test]
    fn test_full_document() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [scheduler]
            num_workers = 3
            thread_name_prefix = "kernel"
            single_threaded = true

            [log]
            level = "trace"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.num_workers, 3);
        assert_eq!(config.scheduler.thread_name_prefix, "kernel");
        assert!(config.scheduler.single_threaded);
        assert_eq!(config.log.level, LogLevel::Trace);
    }

    #[test]
    fn test_parse_error() {
        let err = RuntimeConfig::from_toml_str("[scheduler\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
        assert!(err.to_string().starts_with("Config parse error"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = RuntimeConfig::from_toml_str("[scheduler]\nnum_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = RuntimeConfig::default();
        config.scheduler.num_workers = 5;
        config.log.level = LogLevel::Error;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RuntimeConfig::from_toml_str(&text).unwrap(), config);
    }
}

#[cfg(test)]
mod override_tests {
    use super::*;

    #[test]
    fn test_overrides_take_priority() {
        let mut config = RuntimeConfig::from_toml_str("[scheduler]\nnum_workers = 2").unwrap();
        config
            .apply_overrides(lookup(&[(ENV_NUM_WORKERS, "7"), (ENV_LOG, "debug")]))
            .unwrap();
        assert_eq!(config.scheduler.num_workers, 7);
        assert_eq!(config.log.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_NUM_WORKERS, "many")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value `many` for `JITRT_NUM_WORKERS`"
        );
    }

    #[test]
    fn test_no_overrides_is_noop() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nnum_workers = 1\n\n[log]\nlevel = \"warn\"").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        if std::env::var(ENV_NUM_WORKERS).is_err() {
            assert_eq!(config.scheduler.num_workers, 1);
        }
        if std::env::var(ENV_LOG).is_err() {
            assert_eq!(config.log.level, LogLevel::Warn);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
