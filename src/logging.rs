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

//! Logging setup for the chunk retrieval engine.
//!
//! Installs a `tracing-subscriber` registry writing to a file or stderr.
//!
//! ## Configuration priority
//!
//! 1. `databricks.log_level` / `databricks.log_file` options (highest)
//! 2. `RUST_LOG` environment variable
//! 3. Default: `databricks_cloudfetch=warn`
//!
//! ```bash
//! RUST_LOG=databricks_cloudfetch=debug ./my_app
//! ```

use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TARGET: &str = "databricks_cloudfetch";

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Logging configuration taken from connection options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level: "OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE".
    pub level: Option<String>,
    /// Log file path. If unset, logs go to stderr.
    pub file: Option<String>,
}

impl LogConfig {
    fn is_off(&self) -> bool {
        self.level
            .as_deref()
            .is_some_and(|level| level.eq_ignore_ascii_case("off"))
    }

    /// Filter directive for an explicit level, if one was configured.
    fn directive(&self) -> Option<String> {
        self.level
            .as_ref()
            .map(|level| format!("{}={}", LOG_TARGET, level.to_lowercase()))
    }
}

/// Initialize the tracing subscriber.
///
/// Runs at most once per process; the first session to call it wins and
/// later calls are no-ops.
pub fn init_logging(config: &LogConfig) {
    LOGGING_INITIALIZED.get_or_init(|| {
        if config.is_off() {
            return;
        }

        let filter = match config.directive() {
            Some(directive) => EnvFilter::new(directive),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=warn", LOG_TARGET))),
        };

        if let Some(ref path) = config.file {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!(
                        "databricks-cloudfetch: failed to open log file {}: {}",
                        path, e
                    );
                    return;
                }
            };

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_target(false)
                        .with_ansi(false)
                        .with_timer(SystemTime),
                )
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .with_timer(SystemTime),
                )
                .try_init()
                .ok();
        }
    });
}
