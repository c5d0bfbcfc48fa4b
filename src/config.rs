use std::time::Duration;

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockConfig {
    /// Used by [`MutexLock::acquire`](crate::MutexLock::acquire).
    pub default_timeout: Duration,
}

impl LockConfig {
    pub const TIMEOUT_VAR: &'static str = "DIBS_LOCK_TIMEOUT_MS";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_var(std::env::var(Self::TIMEOUT_VAR).ok().as_deref())
    }

    fn from_var(value: Option<&str>) -> Result<Self, ConfigError> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let millis: u64 = value
            .trim()
            .parse()
            .map_err(|source| ConfigError::Malformed {
                var: Self::TIMEOUT_VAR,
                value: value.to_owned(),
                source,
            })?;
        if millis == 0 {
            return Err(ConfigError::Zero {
                var: Self::TIMEOUT_VAR,
            });
        }
        Ok(Self {
            default_timeout: Duration::from_millis(millis),
        })
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}
