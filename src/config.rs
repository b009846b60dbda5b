//! `stackpile.toml` config loading.

use serde::{Deserialize, Serialize};

use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::path::Path;

use crate::{StackpileError, StackpileResult};

pub const DEFAULT_CONFIG_FILE: &str = "stackpile.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Address the ingestion server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Factor applied to every decoded sample count; corrects for clients
    /// that sample at a lower rate than the server assumes.
    #[serde(default = "default_sampling_multiplier")]
    pub sampling_multiplier: u64,

    /// Width of a storage time bucket.
    #[serde(default = "default_segment_resolution_secs")]
    pub segment_resolution_secs: u64,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Requests with larger bodies are refused.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:4040".to_string()
}

fn default_sampling_multiplier() -> u64 {
    1
}

fn default_segment_resolution_secs() -> u64 {
    10
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            sampling_multiplier: default_sampling_multiplier(),
            segment_resolution_secs: default_segment_resolution_secs(),
            log_filter: default_log_filter(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Strict variant for an explicitly requested file.
    pub fn load(path: &Path) -> StackpileResult<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&s)?)
    }

    pub fn validate(&self) -> StackpileResult<()> {
        self.listen_socket_addr()?;
        self.multiplier()?;
        if self.segment_resolution_secs == 0 {
            return Err(StackpileError::Config(
                "segment_resolution_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> StackpileResult<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            StackpileError::Config(format!("invalid listen_addr {:?}: {e}", self.listen_addr))
        })
    }

    pub fn multiplier(&self) -> StackpileResult<SamplingMultiplier> {
        SamplingMultiplier::new(self.sampling_multiplier)
    }
}

/// Scale factor applied to raw sample counts, always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingMultiplier(NonZeroU64);

impl SamplingMultiplier {
    pub const ONE: Self = Self(NonZeroU64::MIN);

    pub fn new(value: u64) -> StackpileResult<Self> {
        NonZeroU64::new(value).map(Self).ok_or_else(|| {
            StackpileError::Config("sampling_multiplier must be at least 1".to_string())
        })
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Scaled count, saturating at `u64::MAX`.
    pub fn apply(self, raw: u64) -> u64 {
        raw.saturating_mul(self.0.get())
    }
}

impl Default for SamplingMultiplier {
    fn default() -> Self {
        Self::ONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TmpDir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TmpDir::new("config-missing");
        let cfg = Config::load_optional(&dir.path().join(DEFAULT_CONFIG_FILE));
        assert_eq!(cfg.listen_addr, "127.0.0.1:4040");
        assert_eq!(cfg.sampling_multiplier, 1);
        assert_eq!(cfg.segment_resolution_secs, 10);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TmpDir::new("config-partial");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "sampling_multiplier = 100\nlog_filter = \"debug\"\n")
            .expect("write config");
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.sampling_multiplier, 100);
        assert_eq!(cfg.log_filter, "debug");
        assert_eq!(cfg.max_body_bytes, 64 * 1024 * 1024);
        assert_eq!(cfg.multiplier().expect("multiplier").get(), 100);
    }

    #[test]
    fn unparsable_file_falls_back_but_strict_load_fails() {
        let dir = TmpDir::new("config-broken");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "sampling_multiplier = \"lots\"").expect("write config");
        assert_eq!(Config::load_optional(&path).sampling_multiplier, 1);
        assert!(matches!(Config::load(&path), Err(StackpileError::Toml(_))));
    }

    #[test]
    fn validate_rejects_zero_multiplier_and_bad_addr() {
        let cfg = Config {
            sampling_multiplier: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(StackpileError::Config(_))));

        let cfg = Config {
            listen_addr: "not an addr".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(StackpileError::Config(_))));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn multiplier_saturates() {
        let m = SamplingMultiplier::new(10).expect("multiplier");
        assert_eq!(m.apply(7), 70);
        assert_eq!(m.apply(u64::MAX), u64::MAX);
        assert_eq!(SamplingMultiplier::default().apply(3), 3);
    }
}
