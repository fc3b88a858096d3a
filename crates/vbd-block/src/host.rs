//! A set of independent devices hosted by one process.

use crate::config::HostConfig;
use crate::device::Device;
use tracing::info;
use vbd_error::Result;

/// Devices built from one [`HostConfig`]. Each device owns its own store,
/// lock, and timer; nothing is shared between them.
#[derive(Debug, Default)]
pub struct DeviceSet {
    devices: Vec<Device>,
}

impl DeviceSet {
    /// Validate `config` and build every device it names.
    ///
    /// Construction is all-or-nothing: if any device fails (e.g. allocation),
    /// the devices already built are dropped and the error is returned.
    pub fn build(config: &HostConfig) -> Result<Self> {
        config.validate()?;
        let devices = config
            .device_names()
            .into_iter()
            .map(|name| Device::new(name, &config.device))
            .collect::<Result<Vec<_>>>()?;
        info!(ndevices = devices.len(), prefix = %config.name_prefix, "device set ready");
        Ok(Self { devices })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|dev| dev.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use vbd_types::{Direction, SectorNumber};

    fn host(ndevices: usize) -> HostConfig {
        HostConfig {
            ndevices,
            device: DeviceConfig {
                nsectors: 16,
                ..DeviceConfig::default()
            },
            ..HostConfig::default()
        }
    }

    #[test]
    fn builds_named_devices() {
        let set = DeviceSet::build(&host(4)).expect("set");
        let names: Vec<&str> = set.iter().map(Device::name).collect();
        assert_eq!(names, vec!["vbda", "vbdb", "vbdc", "vbdd"]);
        assert!(set.get("vbdc").is_some());
        assert!(set.get("vbde").is_none());
    }

    #[test]
    fn zero_devices_is_allowed() {
        let set = DeviceSet::build(&host(0)).expect("set");
        assert!(set.is_empty());
    }

    #[test]
    fn devices_do_not_share_storage() {
        let set = DeviceSet::build(&host(2)).expect("set");
        let a = set.get("vbda").expect("a");
        let b = set.get("vbdb").expect("b");

        let mut pattern = [0x5C_u8; 512];
        a.transfer(Direction::Write, SectorNumber(1), 1, &mut pattern)
            .expect("write");

        let mut out = [0xFF_u8; 512];
        b.transfer(Direction::Read, SectorNumber(1), 1, &mut out)
            .expect("read");
        assert_eq!(out, [0_u8; 512]);
    }

    #[test]
    fn invalid_host_config_builds_nothing() {
        let mut config = host(2);
        config.device.nsectors = 0;
        assert!(DeviceSet::build(&config).is_err());
    }
}
