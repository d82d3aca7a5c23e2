// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Flightdeck configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL for active recording rows
    pub database_url: String,
    /// Root directory of the local archive store
    pub archive_dir: PathBuf,
    /// Number of concurrently executing jobs
    pub job_workers: usize,
    /// Capacity of the job queue; dispatch fails when full
    pub job_queue_capacity: usize,
    /// Upper bound on synchronous waits against a remote target
    pub request_timeout: Duration,
    /// Interval between recording state polls
    pub poll_interval: Duration,
    /// Archive externally discovered recordings when they stop
    pub external_archival: bool,
    /// Maximum archived files kept per JVM for pushed recordings
    pub push_max_files: usize,
    /// Base URL of the external datasource, if uploads are enabled
    pub datasource_url: Option<String>,
    /// Upper bound on a whole datasource upload; unbounded when unset
    pub datasource_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FLIGHTDECK_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `FLIGHTDECK_ARCHIVE_DIR`: archive root (default: `.data/archives`)
    /// - `FLIGHTDECK_JOB_WORKERS`: concurrent jobs (default: 4)
    /// - `FLIGHTDECK_JOB_QUEUE_CAPACITY`: queued jobs (default: 64)
    /// - `FLIGHTDECK_REQUEST_TIMEOUT_SECS`: remote request timeout (default: 30)
    /// - `FLIGHTDECK_POLL_INTERVAL_SECS`: state poll interval (default: 10)
    /// - `FLIGHTDECK_EXTERNAL_ARCHIVAL`: archive external recordings (default: false)
    /// - `FLIGHTDECK_PUSH_MAX_FILES`: pushed archives kept per JVM (default: 10)
    /// - `FLIGHTDECK_DATASOURCE_URL`: external datasource base URL (default: unset)
    /// - `FLIGHTDECK_DATASOURCE_TIMEOUT_SECS`: datasource upload timeout (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLIGHTDECK_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FLIGHTDECK_DATABASE_URL"))?;

        let archive_dir = std::env::var("FLIGHTDECK_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".data/archives"));

        let job_workers = parse_var::<usize>("FLIGHTDECK_JOB_WORKERS", "4")
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FLIGHTDECK_JOB_WORKERS",
                "must be a positive integer",
            ))?;

        let job_queue_capacity = parse_var::<usize>("FLIGHTDECK_JOB_QUEUE_CAPACITY", "64")
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FLIGHTDECK_JOB_QUEUE_CAPACITY",
                "must be a positive integer",
            ))?;

        let request_timeout_secs = parse_var::<u64>("FLIGHTDECK_REQUEST_TIMEOUT_SECS", "30")
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FLIGHTDECK_REQUEST_TIMEOUT_SECS",
                "must be a positive number of seconds",
            ))?;

        let poll_interval_secs = parse_var::<u64>("FLIGHTDECK_POLL_INTERVAL_SECS", "10")
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FLIGHTDECK_POLL_INTERVAL_SECS",
                "must be a positive number of seconds",
            ))?;

        let external_archival = match std::env::var("FLIGHTDECK_EXTERNAL_ARCHIVAL") {
            Ok(v) => parse_bool(&v).ok_or(ConfigError::Invalid(
                "FLIGHTDECK_EXTERNAL_ARCHIVAL",
                "must be true or false",
            ))?,
            Err(_) => false,
        };

        let push_max_files = parse_var::<usize>("FLIGHTDECK_PUSH_MAX_FILES", "10")
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FLIGHTDECK_PUSH_MAX_FILES",
                "must be a positive integer",
            ))?;

        let datasource_url = std::env::var("FLIGHTDECK_DATASOURCE_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let datasource_timeout = match std::env::var("FLIGHTDECK_DATASOURCE_TIMEOUT_SECS") {
            Ok(v) => Some(
                v.parse::<u64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::Invalid(
                        "FLIGHTDECK_DATASOURCE_TIMEOUT_SECS",
                        "must be a positive number of seconds",
                    ))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            archive_dir,
            job_workers,
            job_queue_capacity,
            request_timeout: Duration::from_secs(request_timeout_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            external_archival,
            push_max_files,
            datasource_url,
            datasource_timeout,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, T::Err> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
