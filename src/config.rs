//! Validated configuration record.
//!
//! The crate never reads files or environment variables -- that's out of
//! scope here -- it only validates whatever record the embedding
//! application assembled, treating it as an external collaborator whose
//! invariants must hold before the machine trusts it.

use std::time::Duration;

use crate::error::ConfigError;

/// Tunables consumed by the state machine, the rate limiter and the
/// supervisor. Constructed via [`Config::builder`], validated once by
/// [`Config::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub retry_backoff_base: f64,
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub stability_timeout: Duration,
    pub max_ping_interval: Duration,
    pub max_pong_delay: Duration,
    pub rate_limit_window: Duration,
    pub max_messages_per_window: u32,
    pub max_bytes_per_message: usize,
    pub max_queue_size: usize,
    pub max_buffer_size: usize,
    /// Whether backoff delays are jittered by up to ±10%.
    pub jitter: bool,
    /// Inbox high-water mark; SEND is rejected with `overloaded` above it.
    pub inbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 5,
            initial_retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_millis(60_000),
            retry_backoff_base: 2.0,
            connect_timeout: Duration::from_millis(30_000),
            disconnect_timeout: Duration::from_millis(3_000),
            stability_timeout: Duration::from_millis(5_000),
            max_ping_interval: Duration::from_millis(30_000),
            max_pong_delay: Duration::from_millis(5_000),
            rate_limit_window: Duration::from_millis(10_000),
            max_messages_per_window: 500,
            max_bytes_per_message: 65_536,
            max_queue_size: 1000,
            max_buffer_size: 4 * 1024 * 1024,
            jitter: false,
            inbox_capacity: 256,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }

    /// Checks every per-field constraint and cross-cutting constraint.
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(3..=10).contains(&self.max_retries) {
            return Err(ConfigError::invalid(
                "max_retries",
                "must be between 3 and 10",
            ));
        }
        if self.initial_retry_delay < Duration::from_millis(100) {
            return Err(ConfigError::invalid(
                "initial_retry_delay",
                "must be >= 100ms",
            ));
        }
        if self.max_retry_delay < self.initial_retry_delay {
            return Err(ConfigError::invalid(
                "max_retry_delay",
                "must be >= initial_retry_delay",
            ));
        }
        if self.retry_backoff_base <= 1.0 {
            return Err(ConfigError::invalid(
                "retry_backoff_base",
                "must be > 1.0",
            ));
        }
        if self.connect_timeout <= self.initial_retry_delay {
            return Err(ConfigError::invalid(
                "connect_timeout",
                "must be greater than initial_retry_delay",
            ));
        }
        if self.disconnect_timeout.is_zero() {
            return Err(ConfigError::invalid("disconnect_timeout", "must be > 0"));
        }
        if self.stability_timeout.is_zero() {
            return Err(ConfigError::invalid("stability_timeout", "must be > 0"));
        }
        if self.max_ping_interval <= self.max_pong_delay * 2 {
            return Err(ConfigError::invalid(
                "max_ping_interval",
                "must be greater than 2x max_pong_delay",
            ));
        }
        if self.max_pong_delay.is_zero() {
            return Err(ConfigError::invalid("max_pong_delay", "must be > 0"));
        }
        if self.rate_limit_window <= self.initial_retry_delay {
            return Err(ConfigError::invalid(
                "rate_limit_window",
                "must be greater than initial_retry_delay",
            ));
        }
        if self.max_messages_per_window < 1 {
            return Err(ConfigError::invalid(
                "max_messages_per_window",
                "must be >= 1",
            ));
        }
        if self.max_bytes_per_message < 1024 {
            return Err(ConfigError::invalid(
                "max_bytes_per_message",
                "must be >= 1024 bytes",
            ));
        }
        if self.max_queue_size < 1 {
            return Err(ConfigError::invalid("max_queue_size", "must be >= 1"));
        }
        if self.max_buffer_size <= self.max_bytes_per_message {
            return Err(ConfigError::invalid(
                "max_buffer_size",
                "must be greater than max_bytes_per_message",
            ));
        }

        // Cross-cutting constraints.
        let worst_case_backoff = self.retry_backoff_base.powi(self.max_retries as i32)
            * self.initial_retry_delay.as_millis() as f64;
        if worst_case_backoff >= Duration::from_secs(3600).as_millis() as f64 {
            return Err(ConfigError::invalid(
                "retry_backoff_base",
                "retry_backoff_base^max_retries * initial_retry_delay must stay under 1 hour",
            ));
        }
        if (self.max_messages_per_window as u64) * (self.max_bytes_per_message as u64)
            >= self.max_buffer_size as u64
        {
            return Err(ConfigError::invalid(
                "max_messages_per_window",
                "max_messages_per_window * max_bytes_per_message must stay under max_buffer_size",
            ));
        }
        if (self.max_queue_size as u64) * (self.max_bytes_per_message as u64)
            >= self.max_buffer_size as u64
        {
            return Err(ConfigError::invalid(
                "max_queue_size",
                "max_queue_size * max_bytes_per_message must stay under max_buffer_size",
            ));
        }

        Ok(())
    }
}

/// Builder for [`Config`], seeded with [`Config::default`]'s values.
#[derive(Debug, Clone)]
pub struct ConfigBuilder(Config);

macro_rules! setter {
    ($name:ident: $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.0.$name = value;
            self
        }
    };
}

impl ConfigBuilder {
    setter!(max_retries: u32);
    setter!(initial_retry_delay: Duration);
    setter!(max_retry_delay: Duration);
    setter!(retry_backoff_base: f64);
    setter!(connect_timeout: Duration);
    setter!(disconnect_timeout: Duration);
    setter!(stability_timeout: Duration);
    setter!(max_ping_interval: Duration);
    setter!(max_pong_delay: Duration);
    setter!(rate_limit_window: Duration);
    setter!(max_messages_per_window: u32);
    setter!(max_bytes_per_message: usize);
    setter!(max_queue_size: usize);
    setter!(max_buffer_size: usize);
    setter!(jitter: bool);
    setter!(inbox_capacity: usize);

    /// Validates and returns the finished [`Config`].
    pub fn build(self) -> Result<Config, ConfigError> {
        self.0.validate()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_max_retries_out_of_range() {
        let err = Config::builder().max_retries(1).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::invalid("max_retries", "must be between 3 and 10")
        );
    }

    #[test]
    fn rejects_max_retry_delay_below_initial() {
        let err = Config::builder()
            .initial_retry_delay(Duration::from_millis(2000))
            .max_retry_delay(Duration::from_millis(1000))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::invalid("max_retry_delay", "must be >= initial_retry_delay")
        );
    }

    #[test]
    fn rejects_runaway_backoff_budget() {
        let err = Config::builder()
            .max_retries(10)
            .retry_backoff_base(10.0)
            .max_retry_delay(Duration::from_secs(3600))
            .connect_timeout(Duration::from_secs(7200))
            .rate_limit_window(Duration::from_secs(7200))
            .max_messages_per_window(10)
            .max_queue_size(10)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string().contains("1 hour"), true);
    }

    #[test]
    fn scenario_config_for_rate_limit_test() {
        // mirrors the rate-limiting window test scenario
        let cfg = Config::builder()
            .max_messages_per_window(3)
            .rate_limit_window(Duration::from_millis(1000))
            .connect_timeout(Duration::from_millis(100_000))
            .initial_retry_delay(Duration::from_millis(100))
            .max_retry_delay(Duration::from_millis(500))
            .build()
            .unwrap();
        assert_eq!(cfg.max_messages_per_window, 3);
    }
}
