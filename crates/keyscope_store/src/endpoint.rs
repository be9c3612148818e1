//! Dial target and credentials.

use std::time::Duration;

/// Where and how to connect to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Shared credential, sent with `AUTH` when present.
    pub password: Option<String>,
    /// Upper bound for dialing and authenticating.
    pub connect_timeout: Duration,
}

impl Endpoint {
    /// Creates an endpoint without a password.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the password. An empty string clears it.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = if password.is_empty() {
            None
        } else {
            Some(password)
        };
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_builder() {
        let endpoint = Endpoint::new("cache.internal", 6380)
            .with_password("s3cret")
            .with_connect_timeout(Duration::from_secs(5));

        assert_eq!(endpoint.address(), "cache.internal:6380");
        assert_eq!(endpoint.password.as_deref(), Some("s3cret"));
        assert_eq!(endpoint.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn empty_password_is_none() {
        let endpoint = Endpoint::default().with_password("");
        assert_eq!(endpoint.password, None);
    }
}
