//! HTTP adapter for Memmert AtmoWEB controllers.
//!
//! Every request is a `GET` against `/atmoweb`. Reading a key sends it with an
//! empty value (`?TempSet=`); writing sends the new value (`?TempSet=37.5`).
//! The controller answers with the key's current value, plus range metadata
//! for setpoint keys. Bodies are parsed with [`crate::parser`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use atmolog_core::{AtmoWebClient, DeviceInterface};
//!
//! # async fn example() -> atmolog_core::Result<()> {
//! let device = AtmoWebClient::new("192.168.100.100", 80, Duration::from_secs(5))?;
//! let values = device.get(&["Temp1Read".to_string()]).await?;
//! println!("{:?}", values);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use atmolog_types::{ChannelValues, SetOutcome, UNKNOWN_MODE, ValueRange, channels};

use crate::error::{Error, Result};
use crate::parser::{self, Response};
use crate::retry::{RetryConfig, with_retry};
use crate::traits::DeviceInterface;

/// Client for one AtmoWEB controller.
#[derive(Debug, Clone)]
pub struct AtmoWebClient {
    client: Client,
    base_url: String,
    identity: String,
    timeout: Duration,
    read_retry: RetryConfig,
    write_retry: RetryConfig,
    mode_key: String,
}

impl AtmoWebClient {
    /// Create a client for the controller at `address:port`.
    ///
    /// `address` is a bare host name or IP address; `timeout` bounds every
    /// single request.
    pub fn new(address: &str, port: u16, timeout: Duration) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::InvalidConfig("device address is empty".to_string()));
        }
        if address.contains("://") || address.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "device address must be a host name or IP, got: {}",
                address
            )));
        }
        if timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;
        let identity = if port == 80 {
            address.to_string()
        } else {
            format!("{}:{}", address, port)
        };

        Ok(Self {
            client,
            base_url: format!("http://{}:{}/atmoweb", address, port),
            identity,
            timeout,
            read_retry: RetryConfig::for_read(),
            write_retry: RetryConfig::for_write(),
            mode_key: channels::MODE.to_string(),
        })
    }

    /// Override the retry policy for reads.
    #[must_use]
    pub fn with_read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    /// Override the retry policy for writes.
    #[must_use]
    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }

    /// Override the key used to query the operating mode.
    #[must_use]
    pub fn with_mode_key(mut self, key: impl Into<String>) -> Self {
        self.mode_key = key.into();
        self
    }

    /// The endpoint requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request with the given query parameters and parse the body.
    pub async fn query(&self, params: &[(&str, String)]) -> Result<Response> {
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?
            .error_for_status()?;

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!("AtmoWEB {:?} -> {}", params, body.trim());
        parser::parse_response(&body)
    }

    async fn read_key(&self, key: &str) -> Result<Response> {
        let params = [(key, String::new())];
        with_retry(&self.read_retry, &format!("query {}", key), || {
            self.query(&params)
        })
        .await
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(format!("GET {}", self.base_url), self.timeout)
        } else if e.is_connect() {
            Error::unreachable(&self.base_url, e.to_string())
        } else {
            Error::Http(e)
        }
    }
}

#[async_trait]
impl DeviceInterface for AtmoWebClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn get(&self, names: &[String]) -> Result<ChannelValues> {
        let mut values = ChannelValues::new();
        let mut unreachable = None;
        let mut answered = false;
        for name in names {
            let value = match self.read_key(name).await {
                Ok(response) => {
                    answered = true;
                    response.get(name.as_str()).and_then(parser::numeric)
                }
                Err(e) if e.is_transient() => {
                    warn!("Failed to read {}: {}", name, e);
                    unreachable = Some(e);
                    None
                }
                Err(e) => {
                    answered = true;
                    warn!("Failed to read {}: {}", name, e);
                    None
                }
            };
            values.insert(name.clone(), value);
        }
        match unreachable {
            Some(e) if !answered => Err(e),
            _ => Ok(values),
        }
    }

    async fn set(&self, name: &str, value: f64) -> Result<SetOutcome> {
        let params = [(name, value.to_string())];
        let response = with_retry(&self.write_retry, &format!("set {}", name), || {
            self.query(&params)
        })
        .await?;

        let echoed = response.get(name);
        if echoed.is_some_and(parser::is_marker) {
            return Ok(SetOutcome::Unavailable { requested: value });
        }
        Ok(SetOutcome::Applied {
            requested: value,
            actual: echoed.and_then(parser::numeric),
        })
    }

    async fn valid_range(&self, name: &str) -> Result<Option<ValueRange>> {
        match self.read_key(name).await {
            Ok(response) => Ok(parser::extract_range(name, &response)),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                debug!("No range available for {}: {}", name, e);
                Ok(None)
            }
        }
    }

    async fn mode(&self) -> Result<String> {
        let response = self.read_key(&self.mode_key).await?;
        let mode = match response.get(&self.mode_key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => UNKNOWN_MODE.to_string(),
        };
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_and_identity() {
        let client = AtmoWebClient::new("192.168.100.100", 80, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://192.168.100.100:80/atmoweb");
        assert_eq!(client.identity(), "192.168.100.100");

        let client = AtmoWebClient::new("incubator.lab", 8080, Duration::from_secs(5)).unwrap();
        assert_eq!(client.identity(), "incubator.lab:8080");
    }

    #[test]
    fn test_rejects_urls_and_empty_address() {
        assert!(matches!(
            AtmoWebClient::new("http://10.0.0.2", 80, Duration::from_secs(5)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AtmoWebClient::new("  ", 80, Duration::from_secs(5)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AtmoWebClient::new("10.0.0.2", 80, Duration::ZERO),
            Err(Error::InvalidConfig(_))
        ));
    }
}
