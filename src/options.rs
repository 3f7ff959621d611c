// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! String key/value connection properties.
//!
//! Properties are parsed into [`CloudFetchConfig`], [`HttpClientConfig`] and
//! [`LogConfig`]. Unknown keys are ignored so that properties meant for other
//! layers of the driver can pass through.

use crate::client::HttpClientConfig;
use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::types::cloudfetch::CloudFetchConfig;
use std::time::Duration;
use tracing::debug;

/// Parsed driver options.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    pub cloudfetch: CloudFetchConfig,
    pub http: HttpClientConfig,
    pub log: LogConfig,
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidConfig(format!("invalid value '{}' for option '{}'", value, key))
}

/// Parse a boolean option value.
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Parse a non-negative integer option value.
fn parse_int(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// Parse a float option value.
fn parse_float(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(key, value))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_int(key, value).map(Duration::from_millis)
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    parse_int(key, value).map(Duration::from_secs)
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    u32::try_from(parse_int(key, value)?).map_err(|_| invalid(key, value))
}

impl DriverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from key/value pairs, then validate them.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::new();
        for (key, value) in pairs {
            options.set_option(key.as_ref(), value.as_ref())?;
        }
        options.cloudfetch.validate()?;
        Ok(options)
    }

    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        let cloudfetch = &mut self.cloudfetch;
        let retry = &mut cloudfetch.retry;
        match key {
            // CloudFetch options
            "databricks.cloudfetch.enabled" => cloudfetch.enabled = parse_bool(key, value)?,
            "databricks.cloudfetch.max_parallel_downloads"
            | "databricks.cloudfetch.max_chunks_in_memory" => {
                cloudfetch.max_parallel_chunk_downloads =
                    usize::try_from(parse_int(key, value)?).map_err(|_| invalid(key, value))?;
            }
            "databricks.cloudfetch.link_expiry_buffer_secs" => {
                cloudfetch.link_expiry_buffer_secs =
                    i64::try_from(parse_int(key, value)?).map_err(|_| invalid(key, value))?;
            }
            "databricks.cloudfetch.chunk_ready_timeout_ms" => {
                cloudfetch.chunk_ready_timeout = parse_millis(key, value)?;
            }
            "databricks.cloudfetch.speed_threshold_mbps" => {
                cloudfetch.speed_threshold_mbps = parse_float(key, value)?;
            }

            // Retry options
            "databricks.retry.temporarily_unavailable" => {
                retry.retry_temporarily_unavailable = parse_bool(key, value)?;
            }
            "databricks.retry.rate_limited" => retry.retry_rate_limited = parse_bool(key, value)?,
            "databricks.retry.temporarily_unavailable_timeout_secs" => {
                retry.temporarily_unavailable_retry_timeout = parse_secs(key, value)?;
            }
            "databricks.retry.rate_limit_timeout_secs" => {
                retry.rate_limit_retry_timeout = parse_secs(key, value)?;
            }
            "databricks.retry.max_attempts_per_class" => {
                retry.max_attempts_per_class = parse_u32(key, value)?;
            }
            "databricks.retry.base_delay_ms" => retry.base_delay = parse_millis(key, value)?,
            "databricks.retry.max_delay_ms" => retry.max_delay = parse_millis(key, value)?,
            "databricks.retry.max_jitter" => retry.max_jitter = parse_float(key, value)?,

            // HTTP client options
            "databricks.http.connect_timeout_ms" => {
                self.http.connect_timeout = parse_millis(key, value)?;
            }
            "databricks.http.read_timeout_ms" => {
                self.http.read_timeout = parse_millis(key, value)?;
            }
            "databricks.http.max_connections_per_host" => {
                self.http.max_connections_per_host =
                    usize::try_from(parse_int(key, value)?).map_err(|_| invalid(key, value))?;
            }
            "databricks.http.user_agent" => self.http.user_agent = value.to_string(),
            "databricks.http.proxy" => {
                self.http.proxy = (!value.trim().is_empty()).then(|| value.trim().to_string());
            }

            // Logging options
            "databricks.log_level" => self.log.level = Some(value.to_string()),
            "databricks.log_file" => self.log.file = Some(value.to_string()),

            _ => debug!("Ignoring unknown option '{}'", key),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloudfetch_options() {
        let options = DriverOptions::from_pairs([
            ("databricks.cloudfetch.enabled", "true"),
            ("databricks.cloudfetch.max_chunks_in_memory", "8"),
            ("databricks.cloudfetch.speed_threshold_mbps", "0.5"),
            ("databricks.cloudfetch.chunk_ready_timeout_ms", "1500"),
            ("databricks.cloudfetch.link_expiry_buffer_secs", "60"),
        ])
        .unwrap();

        assert!(options.cloudfetch.enabled);
        assert_eq!(options.cloudfetch.max_parallel_chunk_downloads, 8);
        assert_eq!(options.cloudfetch.speed_threshold_mbps, 0.5);
        assert_eq!(
            options.cloudfetch.chunk_ready_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(options.cloudfetch.link_expiry_buffer_secs, 60);
    }

    #[test]
    fn test_retry_options() {
        let options = DriverOptions::from_pairs([
            ("databricks.retry.temporarily_unavailable", "no"),
            ("databricks.retry.rate_limited", "0"),
            ("databricks.retry.temporarily_unavailable_timeout_secs", "60"),
            ("databricks.retry.rate_limit_timeout_secs", "30"),
            ("databricks.retry.max_attempts_per_class", "3"),
            ("databricks.retry.base_delay_ms", "200"),
            ("databricks.retry.max_delay_ms", "2000"),
            ("databricks.retry.max_jitter", "0.1"),
        ])
        .unwrap();

        let retry = &options.cloudfetch.retry;
        assert!(!retry.retry_temporarily_unavailable);
        assert!(!retry.retry_rate_limited);
        assert_eq!(
            retry.temporarily_unavailable_retry_timeout,
            Duration::from_secs(60)
        );
        assert_eq!(retry.rate_limit_retry_timeout, Duration::from_secs(30));
        assert_eq!(retry.max_attempts_per_class, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(200));
        assert_eq!(retry.max_delay, Duration::from_millis(2000));
        assert_eq!(retry.max_jitter, 0.1);
    }

    #[test]
    fn test_http_and_log_options() {
        let options = DriverOptions::from_pairs([
            ("databricks.http.connect_timeout_ms", "5000"),
            ("databricks.http.read_timeout_ms", "9000"),
            ("databricks.http.max_connections_per_host", "4"),
            ("databricks.http.user_agent", "test-agent/1.0"),
            ("databricks.http.proxy", "http://proxy.local:3128"),
            ("databricks.log_level", "DEBUG"),
            ("databricks.log_file", "/tmp/cloudfetch.log"),
        ])
        .unwrap();

        assert_eq!(options.http.connect_timeout, Duration::from_millis(5000));
        assert_eq!(options.http.read_timeout, Duration::from_millis(9000));
        assert_eq!(options.http.max_connections_per_host, 4);
        assert_eq!(options.http.user_agent, "test-agent/1.0");
        assert_eq!(
            options.http.proxy.as_deref(),
            Some("http://proxy.local:3128")
        );
        assert_eq!(options.log.level.as_deref(), Some("DEBUG"));
        assert_eq!(options.log.file.as_deref(), Some("/tmp/cloudfetch.log"));
    }

    #[test]
    fn test_malformed_value_names_key() {
        let mut options = DriverOptions::new();
        let err = options
            .set_option("databricks.cloudfetch.max_parallel_downloads", "many")
            .unwrap_err();
        match err {
            Error::InvalidConfig(message) => {
                assert!(message.contains("databricks.cloudfetch.max_parallel_downloads"))
            }
            other => panic!("expected InvalidConfig, got {:?}", other),
        }

        assert!(options
            .set_option("databricks.cloudfetch.enabled", "maybe")
            .is_err());
        assert!(options
            .set_option("databricks.retry.max_jitter", "NaN")
            .is_err());
        assert!(options
            .set_option("databricks.http.read_timeout_ms", "-1")
            .is_err());
    }

    #[test]
    fn test_unknown_option_is_ignored() {
        let mut options = DriverOptions::new();
        assert!(options.set_option("databricks.catalog", "main").is_ok());
    }

    #[test]
    fn test_zero_parallelism_fails_validation() {
        let result =
            DriverOptions::from_pairs([("databricks.cloudfetch.max_parallel_downloads", "0")]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
