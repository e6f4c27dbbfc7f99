//! Configuration module for Treeline Monitor.
//!
//! This module handles parsing configuration from environment variables.
//! Every value can later be replaced at runtime through
//! [`WorktreeMonitor::update_config`](crate::monitor::WorktreeMonitor::update_config).
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TREELINE_POLL_INTERVAL_MS` | 2000 | Base delay between polls |
//! | `TREELINE_MAX_POLL_INTERVAL_MS` | 30000 | Upper bound for adaptive backoff |
//! | `TREELINE_ADAPTIVE_BACKOFF` | true | Scale the delay with cycle duration |
//! | `TREELINE_BREAKER_THRESHOLD` | 3 | Consecutive failures before polling stops |
//! | `TREELINE_SUMMARY_DEBOUNCE_MS` | 10000 | Quiet period before a debounced summary |
//! | `TREELINE_NOTE_ENABLED` | true | Read the status note each cycle |
//! | `TREELINE_NOTE_FILENAME` | `treeline-note` | Note filename in the git metadata dir |
//! | `TREELINE_MAIN_BRANCH` | `main` | Reference branch name |
//!
//! # Example
//!
//! ```no_run
//! use treeline_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Polling every {:?}", config.poll_interval);
//! ```

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::note::DEFAULT_NOTE_FILENAME;

/// Default base poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default maximum poll interval in milliseconds.
const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 30_000;

/// Default number of consecutive failures that trips the breaker.
const DEFAULT_BREAKER_THRESHOLD: u32 = 3;

/// Default summary debounce delay in milliseconds.
const DEFAULT_SUMMARY_DEBOUNCE_MS: u64 = 10_000;

/// Default reference branch.
const DEFAULT_MAIN_BRANCH: &str = "main";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Runtime configuration of one worktree monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Delay between polls when cycles are fast.
    pub poll_interval: Duration,

    /// Upper bound for the adaptive delay.
    pub max_poll_interval: Duration,

    /// Scale the next delay with the previous cycle's duration.
    pub adaptive_backoff: bool,

    /// Consecutive failed cycles that trip the circuit breaker.
    pub breaker_threshold: u32,

    /// Quiet period before a debounced summary generation runs.
    pub summary_debounce: Duration,

    /// Whether the status note is read each cycle.
    pub note_enabled: bool,

    /// Note filename inside the worktree's git metadata directory.
    pub note_filename: String,

    /// Reference ("main") branch name.
    pub main_branch: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_poll_interval: Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS),
            adaptive_backoff: true,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            summary_debounce: Duration::from_millis(DEFAULT_SUMMARY_DEBOUNCE_MS),
            note_enabled: true,
            note_filename: DEFAULT_NOTE_FILENAME.to_string(),
            main_branch: DEFAULT_MAIN_BRANCH.to_string(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - a numeric variable cannot be parsed
    /// - `TREELINE_POLL_INTERVAL_MS` or `TREELINE_BREAKER_THRESHOLD` is zero
    /// - a boolean variable is not one of `true`/`false`/`1`/`0`/`yes`/`no`
    /// - `TREELINE_NOTE_FILENAME` or `TREELINE_MAIN_BRANCH` is empty
    /// - the maximum poll interval is below the base interval
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = match env::var("TREELINE_POLL_INTERVAL_MS") {
            Ok(val) => {
                let ms = parse_u64("TREELINE_POLL_INTERVAL_MS", &val)?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "TREELINE_POLL_INTERVAL_MS".to_string(),
                        message: "poll interval must be greater than 0".to_string(),
                    });
                }
                Duration::from_millis(ms)
            }
            Err(_) => defaults.poll_interval,
        };

        let max_poll_interval = match env::var("TREELINE_MAX_POLL_INTERVAL_MS") {
            Ok(val) => Duration::from_millis(parse_u64("TREELINE_MAX_POLL_INTERVAL_MS", &val)?),
            Err(_) => defaults.max_poll_interval,
        };

        let adaptive_backoff = match env::var("TREELINE_ADAPTIVE_BACKOFF") {
            Ok(val) => parse_bool("TREELINE_ADAPTIVE_BACKOFF", &val)?,
            Err(_) => defaults.adaptive_backoff,
        };

        let breaker_threshold = match env::var("TREELINE_BREAKER_THRESHOLD") {
            Ok(val) => {
                let threshold = val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    key: "TREELINE_BREAKER_THRESHOLD".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if threshold == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "TREELINE_BREAKER_THRESHOLD".to_string(),
                        message: "threshold must be at least 1".to_string(),
                    });
                }
                threshold
            }
            Err(_) => defaults.breaker_threshold,
        };

        let summary_debounce = match env::var("TREELINE_SUMMARY_DEBOUNCE_MS") {
            Ok(val) => Duration::from_millis(parse_u64("TREELINE_SUMMARY_DEBOUNCE_MS", &val)?),
            Err(_) => defaults.summary_debounce,
        };

        let note_enabled = match env::var("TREELINE_NOTE_ENABLED") {
            Ok(val) => parse_bool("TREELINE_NOTE_ENABLED", &val)?,
            Err(_) => defaults.note_enabled,
        };

        let note_filename = match env::var("TREELINE_NOTE_FILENAME") {
            Ok(val) => non_empty("TREELINE_NOTE_FILENAME", val)?,
            Err(_) => defaults.note_filename,
        };

        let main_branch = match env::var("TREELINE_MAIN_BRANCH") {
            Ok(val) => non_empty("TREELINE_MAIN_BRANCH", val)?,
            Err(_) => defaults.main_branch,
        };

        let config = Self {
            poll_interval,
            max_poll_interval,
            adaptive_backoff,
            breaker_threshold,
            summary_debounce,
            note_enabled,
            note_filename,
            main_branch,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the maximum poll interval is
    /// below the base interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_poll_interval < self.poll_interval {
            return Err(ConfigError::InvalidValue {
                key: "TREELINE_MAX_POLL_INTERVAL_MS".to_string(),
                message: format!(
                    "maximum interval ({}ms) must not be below the base interval ({}ms)",
                    self.max_poll_interval.as_millis(),
                    self.poll_interval.as_millis()
                ),
            });
        }
        Ok(())
    }
}

fn parse_u64(key: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected non-negative integer, got '{val}'"),
        })
}

fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{val}'"),
        }),
    }
}

fn non_empty(key: &str, val: String) -> Result<String, ConfigError> {
    let trimmed = val.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
