pub mod domain;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod ranking;
pub mod report;
pub mod scoring;
pub mod storage;
pub mod universe;

pub mod config {
    use anyhow::Context;
    use std::str::FromStr;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: Option<String>,
        pub data_provider_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                data_provider_base_url: non_empty_var("DATA_PROVIDER_BASE_URL"),
                data_provider_api_key: non_empty_var("DATA_PROVIDER_API_KEY"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
            self.data_provider_base_url
                .as_deref()
                .context("DATA_PROVIDER_BASE_URL is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    /// Reads `key` and parses it. Unset means `None`; a value that does not parse is an error,
    /// since a silently ignored threshold would change scoring.
    pub fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match non_empty_var(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}")),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn env_parse_reports_bad_values() {
            std::env::set_var("SMARTMONEY_TEST_BAD_FLOAT", "ten");
            let res = env_parse::<f64>("SMARTMONEY_TEST_BAD_FLOAT");
            std::env::remove_var("SMARTMONEY_TEST_BAD_FLOAT");
            let err = res.unwrap_err().to_string();
            assert!(err.contains("SMARTMONEY_TEST_BAD_FLOAT"), "{err}");
        }

        #[test]
        fn env_parse_unset_is_none() {
            let res = env_parse::<u64>("SMARTMONEY_TEST_NEVER_SET").unwrap();
            assert_eq!(res, None);
        }
    }
}
