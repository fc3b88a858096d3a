//! Device and host configuration.
//!
//! Configuration is plain data owned by whoever builds the devices. It is
//! decoded from JSON with per-field defaults and validated before any
//! backing store is allocated.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vbd_error::{Result, VbdError};
use vbd_types::{DEFAULT_NSECTORS, SectorSize};

/// Default delay between the last close and the media-invalidation timer
/// firing.
pub const DEFAULT_INVALIDATE_DELAY_MS: u64 = 30_000;

pub const DEFAULT_NDEVICES: usize = 4;
pub const DEFAULT_NAME_PREFIX: &str = "vbd";

/// Devices are named `<prefix>a` .. `<prefix>z`.
pub const MAX_NDEVICES: usize = 26;

/// How queued requests are decomposed and completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One segment per request, one completion per request.
    #[default]
    WholeRequest,
    /// Every segment in order; the first failure ends the request.
    MultiSegment,
    /// Every segment is its own unit of work with its own completion.
    Direct,
}

/// Key material for the inline cipher. The key length selects AES-128,
/// AES-192 or AES-256.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CipherConfig {
    pub key: Vec<u8>,
}

impl std::fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherConfig")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Per-device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub sector_size: SectorSize,
    /// Device size in sectors of `sector_size`.
    pub nsectors: u64,
    pub dispatch_mode: DispatchMode,
    pub invalidate_delay_ms: u64,
    pub cipher: Option<CipherConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sector_size: SectorSize::DEFAULT,
            nsectors: DEFAULT_NSECTORS,
            dispatch_mode: DispatchMode::default(),
            invalidate_delay_ms: DEFAULT_INVALIDATE_DELAY_MS,
            cipher: None,
        }
    }
}

impl DeviceConfig {
    /// Total capacity in bytes, validating the sector count.
    pub fn capacity_bytes(&self) -> Result<u64> {
        if self.nsectors == 0 {
            return Err(VbdError::InvalidConfig("nsectors must be > 0".to_owned()));
        }
        self.sector_size
            .sectors_to_bytes(self.nsectors)
            .ok_or_else(|| {
                VbdError::InvalidConfig(format!(
                    "capacity overflows u64: nsectors={} sector_size={}",
                    self.nsectors,
                    self.sector_size.get()
                ))
            })
    }

    #[must_use]
    pub fn invalidate_delay(&self) -> Duration {
        Duration::from_millis(self.invalidate_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.capacity_bytes()?;
        if let Some(cipher) = &self.cipher {
            if ![16, 24, 32].contains(&cipher.key.len()) {
                return Err(VbdError::InvalidConfig(format!(
                    "cipher key must be 16, 24 or 32 bytes, got {}",
                    cipher.key.len()
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| VbdError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for a set of independent devices hosted by one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub ndevices: usize,
    pub name_prefix: String,
    pub device: DeviceConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ndevices: DEFAULT_NDEVICES,
            name_prefix: DEFAULT_NAME_PREFIX.to_owned(),
            device: DeviceConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ndevices > MAX_NDEVICES {
            return Err(VbdError::InvalidConfig(format!(
                "ndevices={} exceeds {MAX_NDEVICES}",
                self.ndevices
            )));
        }
        if self.name_prefix.is_empty() {
            return Err(VbdError::InvalidConfig(
                "name_prefix must not be empty".to_owned(),
            ));
        }
        self.device.validate()
    }

    /// Device names in creation order: `vbda`, `vbdb`, ...
    #[must_use]
    pub fn device_names(&self) -> Vec<String> {
        (b'a'..=b'z')
            .take(self.ndevices)
            .map(|letter| format!("{}{}", self.name_prefix, char::from(letter)))
            .collect()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| VbdError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_classic_ram_disk() {
        let config = DeviceConfig::default();
        assert_eq!(config.sector_size.get(), 512);
        assert_eq!(config.nsectors, 1024);
        assert_eq!(config.capacity_bytes().expect("capacity"), 512 * 1024);
        assert_eq!(config.dispatch_mode, DispatchMode::WholeRequest);
        assert_eq!(config.invalidate_delay(), Duration::from_secs(30));
        assert!(config.cipher.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = DeviceConfig::from_json_str(
            r#"{ "nsectors": 64, "dispatch_mode": "multi_segment" }"#,
        )
        .expect("config");
        assert_eq!(config.nsectors, 64);
        assert_eq!(config.sector_size.get(), 512);
        assert_eq!(config.dispatch_mode, DispatchMode::MultiSegment);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(DeviceConfig::from_json_str(r#"{ "nsectors": 0 }"#).is_err());
        assert!(DeviceConfig::from_json_str(r#"{ "sector_size": 1000 }"#).is_err());
        assert!(DeviceConfig::from_json_str(r#"{ "cipher": { "key": [1, 2, 3] } }"#).is_err());
        assert!(DeviceConfig::from_json_str(r#"{ "bogus": true }"#).is_err());
        assert!(
            DeviceConfig::from_json_str(r#"{ "nsectors": 18446744073709551615 }"#).is_err()
        );
    }

    #[test]
    fn cipher_key_debug_does_not_leak_material() {
        let cipher = CipherConfig { key: vec![0x42; 16] };
        let rendered = format!("{cipher:?}");
        assert!(rendered.contains("key_len: 16"));
        assert!(!rendered.contains("66"));
    }

    #[test]
    fn host_config_names_devices_by_letter() {
        let host = HostConfig {
            ndevices: 3,
            ..HostConfig::default()
        };
        assert_eq!(host.device_names(), vec!["vbda", "vbdb", "vbdc"]);
        assert!(
            HostConfig {
                ndevices: 27,
                ..HostConfig::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn host_config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{ "ndevices": 2, "device": {{ "nsectors": 16, "dispatch_mode": "direct" }} }}"#
        )
        .expect("write");

        let host = HostConfig::load(file.path()).expect("load");
        assert_eq!(host.ndevices, 2);
        assert_eq!(host.device.nsectors, 16);
        assert_eq!(host.device.dispatch_mode, DispatchMode::Direct);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = HostConfig::load(dir.path().join("absent.json")).expect_err("missing");
        assert!(matches!(err, VbdError::Io(_)));
    }
}
