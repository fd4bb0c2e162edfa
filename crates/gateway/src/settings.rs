//! Setting proses untuk binary gateway, dibaca dari environment.
//!
//! | var | default |
//! |-----|---------|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8080` |
//! | `WITNESS_TIMEOUT_MS` | `5000` |
//! | `HEALTH_TIMEOUT_MS` | `5000` |
//! | `IDEMPOTENCY_TTL_MS` | `60000` |
//! | `IDEMPOTENCY_SWEEP_MS` | `10000` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use fabric_common::ConfigError;

use crate::witness_client::WitnessClientOptions;

pub const DEFAULT_GATEWAY_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub witness_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub idempotency_ttl_ms: u64,
    pub idempotency_sweep_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            witness_timeout_ms: 5_000,
            health_timeout_ms: 5_000,
            idempotency_ttl_ms: 60_000,
            idempotency_sweep_ms: 10_000,
        }
    }
}

fn parse_var<T: FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        message: format!("cannot parse '{}'", raw),
    })
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Bangun setting dari lookup variabel. Nilai kosong dianggap tidak di-set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut s = Self::default();

        if let Some(host) = get("HOST") {
            s.host = host;
        }
        if let Some(v) = get("PORT") {
            s.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = get("WITNESS_TIMEOUT_MS") {
            s.witness_timeout_ms = parse_var("WITNESS_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("HEALTH_TIMEOUT_MS") {
            s.health_timeout_ms = parse_var("HEALTH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("IDEMPOTENCY_TTL_MS") {
            s.idempotency_ttl_ms = parse_var("IDEMPOTENCY_TTL_MS", &v)?;
        }
        if let Some(v) = get("IDEMPOTENCY_SWEEP_MS") {
            s.idempotency_sweep_ms = parse_var("IDEMPOTENCY_SWEEP_MS", &v)?;
        }

        if s.idempotency_sweep_ms == 0 {
            return Err(ConfigError::Env {
                var: "IDEMPOTENCY_SWEEP_MS".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(s)
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn client_options(&self) -> WitnessClientOptions {
        WitnessClientOptions {
            request_timeout_ms: self.witness_timeout_ms,
            health_timeout_ms: self.health_timeout_ms,
            ..WitnessClientOptions::default()
        }
    }

    #[must_use]
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_millis(self.idempotency_ttl_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.idempotency_sweep_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = GatewaySettings::from_lookup(|_| None).expect("settings");
        assert_eq!(s, GatewaySettings::default());
        assert_eq!(s.bind_addr(), "0.0.0.0:8080");
        assert_eq!(s.client_options().ledger_timeout_ms, 10_000);
        assert_eq!(s.idempotency_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let s = GatewaySettings::from_lookup(|k| match k {
            "PORT" => Some("9000".to_string()),
            "WITNESS_TIMEOUT_MS" => Some("750".to_string()),
            "IDEMPOTENCY_TTL_MS" => Some("1500".to_string()),
            _ => None,
        })
        .expect("settings");
        assert_eq!(s.port, 9000);
        assert_eq!(s.client_options().request_timeout_ms, 750);
        assert_eq!(s.idempotency_ttl(), Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_values() {
        let err = GatewaySettings::from_lookup(|k| (k == "HEALTH_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "HEALTH_TIMEOUT_MS"));

        let err = GatewaySettings::from_lookup(|k| (k == "IDEMPOTENCY_SWEEP_MS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "IDEMPOTENCY_SWEEP_MS"));
    }
}
