//! # Fabric Configuration
//!
//! `FabricConfig` describes the witness set and the quorum parameters.
//!
//! ## Sources (later wins)
//!
//! 1. [`FabricConfig::default`]: 5 witnesses, Q = 4, Δ = 2000 ms
//! 2. TOML file (`FABRIC_CONFIG_FILE`)
//! 3. Env overrides: `FABRIC_QUORUM_SIZE`, `FABRIC_MAX_SKEW_MS`,
//!    `FABRIC_WITNESSES`, `FABRIC_SECURITY_TRACK`
//!
//! `.env` files are loaded with [`load_env_file`] before any of the above.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{QuorumConfigView, SecurityTrack};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_true() -> bool {
    true
}

/// One configured witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessConfig {
    pub witness_id: String,
    /// Base URL, e.g. `http://witness-1:8091`.
    pub endpoint: String,
    pub region: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Hex ed25519 public key for track L verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl WitnessConfig {
    #[must_use]
    pub fn new(witness_id: impl Into<String>, endpoint: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            witness_id: witness_id.into(),
            endpoint: endpoint.into(),
            region: region.into(),
            active: true,
            public_key: None,
        }
    }

    /// Endpoint without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

/// Witness set and quorum parameters. Invariant: `1 <= quorum_size <= total_witnesses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub total_witnesses: usize,
    pub quorum_size: usize,
    pub max_timestamp_skew_ms: u64,
    pub witnesses: Vec<WitnessConfig>,
    pub mirror_endpoints: Vec<String>,
    pub security_track: SecurityTrack,
}

impl Default for FabricConfig {
    fn default() -> Self {
        let regions = [
            "us-east-1",
            "us-west-2",
            "eu-west-1",
            "ap-southeast-1",
            "ap-northeast-1",
        ];
        let witnesses = regions
            .iter()
            .enumerate()
            .map(|(i, region)| {
                WitnessConfig::new(
                    format!("w{}", i + 1),
                    format!("http://witness-{}:8091", i + 1),
                    *region,
                )
            })
            .collect::<Vec<_>>();

        Self {
            total_witnesses: witnesses.len(),
            quorum_size: 4,
            max_timestamp_skew_ms: 2000,
            witnesses,
            mirror_endpoints: Vec::new(),
            security_track: SecurityTrack::Z,
        }
    }
}

impl FabricConfig {
    /// Load from a TOML file. Missing keys take their default.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path.as_ref())?;
        let cfg: FabricConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Defaults, then `FABRIC_CONFIG_FILE`, then env overrides. Validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = match env::var("FABRIC_CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(path.trim())?,
            _ => Self::default(),
        };
        cfg.apply_overrides(|var| env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup (env in production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup("FABRIC_WITNESSES").filter(|v| !v.trim().is_empty()) {
            self.witnesses = parse_witness_list(&list)?;
            self.total_witnesses = self.witnesses.len();
            debug!(witnesses = self.total_witnesses, "witness list taken from FABRIC_WITNESSES");
        }
        if let Some(q) = lookup("FABRIC_QUORUM_SIZE") {
            self.quorum_size = parse_var("FABRIC_QUORUM_SIZE", &q)?;
        }
        if let Some(d) = lookup("FABRIC_MAX_SKEW_MS") {
            self.max_timestamp_skew_ms = parse_var("FABRIC_MAX_SKEW_MS", &d)?;
        }
        if let Some(t) = lookup("FABRIC_SECURITY_TRACK") {
            self.security_track = t.parse().map_err(|message| ConfigError::Env {
                var: "FABRIC_SECURITY_TRACK".to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_witnesses != self.witnesses.len() {
            return Err(ConfigError::Invalid(format!(
                "total_witnesses ({}) does not match witness list ({})",
                self.total_witnesses,
                self.witnesses.len()
            )));
        }
        if self.quorum_size == 0 || self.quorum_size > self.total_witnesses {
            return Err(ConfigError::Invalid(format!(
                "quorum_size must satisfy 1 <= Q <= N (Q={}, N={})",
                self.quorum_size, self.total_witnesses
            )));
        }
        for (i, w) in self.witnesses.iter().enumerate() {
            if w.witness_id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("witness #{} has empty id", i)));
            }
            if w.endpoint.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("witness {} has empty endpoint", w.witness_id)));
            }
            if self.witnesses[..i].iter().any(|o| o.witness_id == w.witness_id) {
                return Err(ConfigError::Invalid(format!("duplicate witness id {}", w.witness_id)));
            }
        }
        Ok(())
    }

    pub fn active_witnesses(&self) -> impl Iterator<Item = &WitnessConfig> {
        self.witnesses.iter().filter(|w| w.active)
    }

    #[must_use]
    pub fn witness(&self, witness_id: &str) -> Option<&WitnessConfig> {
        self.witnesses.iter().find(|w| w.witness_id == witness_id)
    }

    #[must_use]
    pub fn quorum_view(&self) -> QuorumConfigView {
        QuorumConfigView {
            quorum_size: self.quorum_size,
            total_witnesses: self.total_witnesses,
            max_timestamp_skew_ms: self.max_timestamp_skew_ms,
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        message: format!("cannot parse '{}'", raw),
    })
}

/// Parse `id=endpoint@region,id=endpoint@region,...`. Region is optional.
pub fn parse_witness_list(raw: &str) -> Result<Vec<WitnessConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (id, rest) = item.split_once('=').ok_or_else(|| ConfigError::Env {
                var: "FABRIC_WITNESSES".to_string(),
                message: format!("expected id=endpoint[@region], got '{}'", item),
            })?;
            let (endpoint, region) = match rest.rsplit_once('@') {
                Some((e, r)) if !r.contains('/') => (e, r),
                _ => (rest, "unknown"),
            };
            Ok(WitnessConfig::new(id.trim(), endpoint.trim(), region.trim()))
        })
        .collect()
}

/// Load a `.env` file into the process environment.
///
/// `FABRIC_ENV_FILE` selects the file; otherwise `.env`. A missing file is
/// not an error. Called before tracing is initialised, so problems go to stderr.
pub fn load_env_file() {
    let env_file = env::var("FABRIC_ENV_FILE").unwrap_or_else(|_| ".env".to_string());

    match dotenvy::from_filename(&env_file) {
        Ok(path) => {
            env::set_var("_FABRIC_LOADED_ENV_FILE", path.display().to_string());
        }
        Err(e) => {
            if !matches!(e, dotenvy::Error::Io(_)) {
                eprintln!("Warning: failed to load {}: {}", env_file, e);
            }
        }
    }
}
