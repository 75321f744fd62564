// Copyright (c) 2025 BorealDB Contributors
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

//! Logging configuration for the driver core.
//!
//! Initializes a `tracing-subscriber` with file or stderr output.
//!
//! ## Configuration priority
//!
//! 1. `borealdb.log_level` / `borealdb.log_file` database options (highest)
//! 2. `RUST_LOG` environment variable
//! 3. Default: `warn`
//!
//! The first `databaseInit` in the process configures logging; later calls
//! are no-ops.

use crate::options::{OptionMap, OPT_LOG_FILE, OPT_LOG_LEVEL};
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Logging configuration passed via database options.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogConfig {
    /// Log level: "OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE".
    pub level: Option<String>,
    /// Log file path. If unset, logs go to stderr.
    pub file: Option<String>,
}

/// Read the logging options off a database option map and initialize.
pub(crate) fn init_from_options(options: &OptionMap) {
    let config = LogConfig {
        level: options.get_string(OPT_LOG_LEVEL).map(str::to_string),
        file: options.get_string(OPT_LOG_FILE).map(str::to_string),
    };
    init_logging(&config);
}

/// Initialize the tracing subscriber at most once per process.
pub(crate) fn init_logging(config: &LogConfig) {
    LOGGING_INITIALIZED.get_or_init(|| {
        // "OFF" skips initialization entirely
        if let Some(ref level) = config.level {
            if level.eq_ignore_ascii_case("off") {
                return;
            }
        }

        let filter = if let Some(ref level) = config.level {
            EnvFilter::new(format!("borealdb_core={}", level.to_lowercase()))
        } else {
            // Fall back to RUST_LOG env var, default to warn
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("borealdb_core=warn"))
        };

        if let Some(ref path) = config.file {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("borealdb-core: failed to open log file {}: {}", path, e);
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
