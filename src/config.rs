//! Session configuration.
//!
//! Deserialized from JSON the same way connection details arrive from the
//! settings layer: camelCase keys, snake_case aliases, defaults for
//! everything except the port.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;
use zeroize::Zeroize;

use crate::error::ConnectError;
use crate::ledger::DEFAULT_CURRENCY;

/// Fixed key used when the configuration does not provide one.
pub const DEFAULT_ENCRYPTION_KEY: u64 = 0x0123_4567_0123_4567;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Encryption key
// ---------------------------------------------------------------------------

/// Fixed part of the eSSP encryption key. Wiped on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(u64);

impl EncryptionKey {
    pub fn new(key: u64) -> Self {
        Self(key)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for EncryptionKey {
    fn default() -> Self {
        Self(DEFAULT_ENCRYPTION_KEY)
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

impl<'de> Deserialize<'de> for EncryptionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(mut s) => {
                let trimmed = s.trim();
                let parsed = match trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => trimmed.parse::<u64>(),
                };
                s.zeroize();
                parsed
                    .map(Self)
                    .map_err(|e| serde::de::Error::custom(format!("invalid encryption key: {e}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session config
// ---------------------------------------------------------------------------

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Everything [`crate::Session::open`] needs besides the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Port name passed to the transport (e.g. "/dev/ttyACM0", "COM3").
    pub port: String,

    /// eSSP device address.
    #[serde(default, alias = "ssp_address", alias = "sspAddress")]
    pub address: u8,

    #[serde(default, alias = "encryption_key")]
    pub encryption_key: EncryptionKey,

    #[serde(default = "default_poll_interval_ms", alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Denominations at or below this value (major units) are routed to the
    /// payout store at startup.
    #[serde(default, alias = "route_to_storage", alias = "routeToStorage")]
    pub route_to_storage_threshold: Option<u64>,

    /// Treat a failed key exchange as fatal instead of continuing unencrypted.
    #[serde(default, alias = "abort_on_encryption_failure")]
    pub abort_on_encryption_failure: bool,

    /// Currency used until the device reports its channel table.
    #[serde(default = "default_currency", alias = "default_currency")]
    pub default_currency: String,
}

impl SessionConfig {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            address: 0,
            encryption_key: EncryptionKey::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            route_to_storage_threshold: None,
            abort_on_encryption_failure: false,
            default_currency: default_currency(),
        }
    }

    /// Parse and validate a JSON settings object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConnectError> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| ConnectError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.port.trim().is_empty() {
            return Err(ConnectError::InvalidConfig("port must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConnectError::InvalidConfig(
                "pollIntervalMs must be greater than zero".into(),
            ));
        }
        if self.default_currency.len() != 3 {
            return Err(ConnectError::InvalidConfig(format!(
                "defaultCurrency must be a 3-letter code, got {:?}",
                self.default_currency
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_route_to_storage(mut self, threshold: u64) -> Self {
        self.route_to_storage_threshold = Some(threshold);
        self
    }

    pub fn with_encryption_key(mut self, key: u64) -> Self {
        self.encryption_key = EncryptionKey::new(key);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let cfg = SessionConfig::from_json(&serde_json::json!({"port": "/dev/ttyACM0"})).unwrap();
        assert_eq!(cfg.port, "/dev/ttyACM0");
        assert_eq!(cfg.address, 0);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.encryption_key.value(), DEFAULT_ENCRYPTION_KEY);
        assert_eq!(cfg.route_to_storage_threshold, None);
        assert!(!cfg.abort_on_encryption_failure);
        assert_eq!(cfg.default_currency, "RUB");
    }

    #[test]
    fn test_from_json_aliases_and_hex_key() {
        let cfg = SessionConfig::from_json(&serde_json::json!({
            "port": "COM3",
            "ssp_address": 16,
            "encryptionKey": "0x10",
            "route_to_storage": 2000,
            "pollIntervalMs": 250,
        }))
        .unwrap();
        assert_eq!(cfg.address, 16);
        assert_eq!(cfg.encryption_key.value(), 0x10);
        assert_eq!(cfg.route_to_storage_threshold, Some(2000));
        assert_eq!(cfg.poll_interval_ms, 250);
    }

    #[test]
    fn test_from_json_missing_port() {
        let err = SessionConfig::from_json(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ConnectError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let cfg = SessionConfig::new("COM1").with_poll_interval(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_port() {
        assert!(SessionConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_bad_key_string() {
        let err = SessionConfig::from_json(&serde_json::json!({
            "port": "COM3",
            "encryptionKey": "not-a-key",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid encryption key"));
    }

    #[test]
    fn test_key_is_redacted_in_debug() {
        let cfg = SessionConfig::new("COM3").with_encryption_key(0xDEAD_BEEF);
        let text = format!("{cfg:?}");
        assert!(text.contains("EncryptionKey(***)"));
        assert!(!text.to_lowercase().contains("deadbeef"));
    }
}
