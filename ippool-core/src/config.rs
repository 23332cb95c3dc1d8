use std::{fs, path::Path, time::Duration};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allocator::{PoolAllocatorOptions, RetryPolicy};

#[derive(Debug, Error)]
pub enum AllocatorConfigError {
    #[error("Io error: {}", .0)]
    IoError(std::io::Error),
    #[error("Deserialization error: {}", .0)]
    DeserializationError(serde_yaml::Error),
    #[error("Invalid configuration! Details: {}", .0)]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AllocatorConfig {
    pub retry: RetryConfig,
    /// `0` lets operations run without a deadline
    pub operation_timeout_secs: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            operation_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub factor: f64,
    pub jitter: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff_ms: 10,
            factor: 1.0,
            jitter: 0.1,
            max_backoff_ms: 1000,
        }
    }
}

impl AllocatorConfig {
    pub fn load(path: &Path) -> Result<Self, AllocatorConfigError> {
        debug!("Used config path: {path:?}");

        let contents = fs::read_to_string(path).map_err(AllocatorConfigError::IoError)?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, AllocatorConfigError> {
        // an empty file means defaults
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: AllocatorConfig =
            serde_yaml::from_str(contents).map_err(AllocatorConfigError::DeserializationError)?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), AllocatorConfigError> {
        if self.retry.attempts == 0 {
            return Err(AllocatorConfigError::Invalid(
                "retry.attempts must be at least 1".to_owned(),
            ));
        }

        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(AllocatorConfigError::Invalid(format!(
                "retry.factor must be a finite number of at least 1.0, got {}",
                self.retry.factor
            )));
        }

        // NaN fails the range check too
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(AllocatorConfigError::Invalid(format!(
                "retry.jitter must be between 0.0 and 1.0, got {}",
                self.retry.jitter
            )));
        }

        Ok(())
    }

    pub fn to_options(&self) -> PoolAllocatorOptions {
        PoolAllocatorOptions {
            retry: RetryPolicy {
                attempts: self.retry.attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                factor: self.retry.factor,
                jitter: self.retry.jitter,
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
            operation_timeout: match self.operation_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
