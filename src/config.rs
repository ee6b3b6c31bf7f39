//! Environment-derived client configuration.
//!
//! The client itself takes plain construction parameters; this module
//! is the conventional `ZPAPI_RNDC_*` environment layer on top of them.

use std::{env, time::Duration};

use crate::{
    auth::Algorithm,
    client::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT},
    Error,
};

const ENV_HOST: &str = "ZPAPI_RNDC_HOST";
const ENV_PORT: &str = "ZPAPI_RNDC_PORT";
const ENV_ALGORITHM: &str = "ZPAPI_RNDC_ALGORITHM";
const ENV_SECRET: &str = "ZPAPI_RNDC_SECRET";
const ENV_TIMEOUT: &str = "ZPAPI_RNDC_TIMEOUT";
const ENV_MAX_RETRIES: &str = "ZPAPI_RNDC_MAX_RETRIES";
const ENV_RETRY_DELAY: &str = "ZPAPI_RNDC_RETRY_DELAY";

/// Connection parameters for an [`RndcClient`](crate::RndcClient).
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname or address.
    pub host: String,

    /// Server control-channel port.
    pub port: u16,

    /// TSIG algorithm of the shared key.
    pub algorithm: Algorithm,

    /// Base64-encoded shared secret.
    pub secret: String,

    /// Per-operation I/O timeout.
    pub timeout: Duration,

    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Pause between retry attempts.
    pub retry_delay: Duration,
}

impl Config {
    /// Reads the configuration from the `ZPAPI_RNDC_*` environment.
    ///
    /// Host, port, algorithm and secret are required; timeout, retry
    /// count and retry delay fall back to the client defaults.
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self {
            host: require(ENV_HOST)?,
            port: parse_port(&require(ENV_PORT)?)?,
            algorithm: require(ENV_ALGORITHM)?.parse()?,
            secret: require(ENV_SECRET)?,
            timeout: optional(ENV_TIMEOUT)
                .as_deref()
                .map(parse_timeout)
                .transpose()?
                .unwrap_or(DEFAULT_TIMEOUT),
            max_retries: optional(ENV_MAX_RETRIES)
                .as_deref()
                .map(parse_max_retries)
                .transpose()?
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: optional(ENV_RETRY_DELAY)
                .as_deref()
                .map(parse_retry_delay)
                .transpose()?
                .unwrap_or(DEFAULT_RETRY_DELAY),
        })
    }
}

fn require(name: &'static str) -> Result<String, Error> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(Error::MissingEnv(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parses a port number, rejecting `0` and anything above 65535.
pub fn parse_port(value: &str) -> Result<u16, Error> {
    value
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or(Error::InvalidPort)
}

/// Parses a timeout in whole seconds; must be greater than zero.
pub fn parse_timeout(value: &str) -> Result<Duration, Error> {
    value
        .parse::<u64>()
        .ok()
        .filter(|t| *t > 0)
        .map(Duration::from_secs)
        .ok_or(Error::InvalidTimeout)
}

/// Parses a retry count; zero disables retries.
pub fn parse_max_retries(value: &str) -> Result<u32, Error> {
    value.parse::<u32>().map_err(|_| Error::InvalidMaxRetries)
}

/// Parses a retry delay in (possibly fractional) seconds.
pub fn parse_retry_delay(value: &str) -> Result<Duration, Error> {
    value
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or(Error::InvalidRetryDelay)
}
