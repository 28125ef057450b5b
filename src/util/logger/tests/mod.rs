//! Logger 单元测试

use crate::util::logger::{try_init, LogLevel};

#[cfg(test)]
mod log_level_tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" info ".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
    }

    #[test]
    fn test_parse_unknown_level() {
        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown log level `loud`");
    }

    #[test]
    fn test_into_tracing_level() {
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let first = try_init(LogLevel::Warn);
        let second = try_init(LogLevel::Debug);
        assert_eq!(first, second);
    }
}
