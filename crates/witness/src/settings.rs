//! Setting proses untuk binary witness, dibaca dari environment.
//!
//! | var | default |
//! |-----|---------|
//! | `WITNESS_ID` | `w1` |
//! | `WITNESS_REGION` | `us-east-1` |
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8091` |
//! | `SECURITY_TRACK` | from `FabricConfig` |
//! | `DATA_DIR` | `./data` |
//! | `MIRROR_PATH` | none |
//! | `WITNESS_SIGNING_KEY` | none (generated on track L) |
//! | `WITNESS_HASHER` | `sha256` (`sha256` or `sha3`) |

use std::env;
use std::path::PathBuf;

use fabric_common::{ConfigError, Hasher, SecurityTrack, Sha256Hasher, Sha3Hasher};

pub const DEFAULT_WITNESS_PORT: u16 = 8091;

/// Algoritma state hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha3,
}

impl HashAlgorithm {
    #[must_use]
    pub fn hasher(self) -> Box<dyn Hasher> {
        match self {
            Self::Sha256 => Box::new(Sha256Hasher),
            Self::Sha3 => Box::new(Sha3Hasher),
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha3" | "sha3-256" => Ok(Self::Sha3),
            other => Err(format!("unknown hash algorithm '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessSettings {
    pub witness_id: String,
    pub region: String,
    pub host: String,
    pub port: u16,
    pub security_track: Option<SecurityTrack>,
    pub data_dir: PathBuf,
    pub mirror_path: Option<PathBuf>,
    /// Hex keypair (64 bytes) untuk signer ed25519.
    pub signing_key: Option<String>,
    pub hasher: HashAlgorithm,
}

impl Default for WitnessSettings {
    fn default() -> Self {
        Self {
            witness_id: "w1".to_string(),
            region: "us-east-1".to_string(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_WITNESS_PORT,
            security_track: None,
            data_dir: PathBuf::from("./data"),
            mirror_path: None,
            signing_key: None,
            hasher: HashAlgorithm::default(),
        }
    }
}

impl WitnessSettings {
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

        if let Some(id) = get("WITNESS_ID") {
            s.witness_id = id;
        }
        if let Some(region) = get("WITNESS_REGION") {
            s.region = region;
        }
        if let Some(host) = get("HOST") {
            s.host = host;
        }
        if let Some(port) = get("PORT") {
            s.port = port.parse().map_err(|_| ConfigError::Env {
                var: "PORT".to_string(),
                message: format!("cannot parse '{}'", port),
            })?;
        }
        if let Some(track) = get("SECURITY_TRACK") {
            s.security_track = Some(track.parse().map_err(|message| ConfigError::Env {
                var: "SECURITY_TRACK".to_string(),
                message,
            })?);
        }
        if let Some(dir) = get("DATA_DIR") {
            s.data_dir = PathBuf::from(dir);
        }
        s.mirror_path = get("MIRROR_PATH").map(PathBuf::from);
        s.signing_key = get("WITNESS_SIGNING_KEY");
        if let Some(hasher) = get("WITNESS_HASHER") {
            s.hasher = hasher.parse().map_err(|message| ConfigError::Env {
                var: "WITNESS_HASHER".to_string(),
                message,
            })?;
        }

        Ok(s)
    }

    /// `<data_dir>/<witness_id>_ledger.ndjson`
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_ledger.ndjson", self.witness_id))
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
