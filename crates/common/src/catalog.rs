//! Fixed registry of base devices and the site ids they expand to.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{Channel, SiteId};
use crate::{Error, Result};

/// A physical base device (map pin). Owns one TH and one VOC site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Base id, e.g. `UTIS0001`.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
}

impl Device {
    pub fn new(id: &str, name: &str, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lat,
            lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCatalog {
    #[serde(default = "default_devices")]
    pub devices: Vec<Device>,
    /// Trailing id segment, e.g. `V6_1`. Empty means no version segment.
    #[serde(default = "default_site_version")]
    pub site_version: String,
}

impl SiteCatalog {
    pub fn new(devices: Vec<Device>, site_version: impl Into<String>) -> Self {
        Self {
            devices,
            site_version: site_version.into(),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, base_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == base_id)
    }

    pub fn site_of(&self, base_id: &str, channel: Channel) -> SiteId {
        if self.site_version.is_empty() {
            SiteId::new(format!("{}-{}", base_id, channel.tag()))
        } else {
            SiteId::new(format!("{}-{}-{}", base_id, channel.tag(), self.site_version))
        }
    }

    pub fn th_site_of(&self, base_id: &str) -> SiteId {
        self.site_of(base_id, Channel::Th)
    }

    pub fn voc_site_of(&self, base_id: &str) -> SiteId {
        self.site_of(base_id, Channel::Voc)
    }

    /// Every site id, TH then VOC per device, in catalog order.
    pub fn sites(&self) -> Vec<SiteId> {
        self.devices
            .iter()
            .flat_map(|d| [self.th_site_of(&d.id), self.voc_site_of(&d.id)])
            .collect()
    }

    pub fn sites_for(&self, channel: Channel) -> Vec<SiteId> {
        self.devices
            .iter()
            .map(|d| self.site_of(&d.id, channel))
            .collect()
    }

    /// Reject catalogs whose generated ids would be ambiguous.
    pub fn validate(&self) -> Result<()> {
        let mut issues: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        if self.devices.is_empty() {
            issues.push("catalog must contain at least one device".into());
        }
        for device in &self.devices {
            if device.id.trim().is_empty() {
                issues.push("device id must not be empty".into());
                continue;
            }
            if Channel::of_site(&device.id).is_some() {
                issues.push(format!("device id {} must not contain a channel segment", device.id));
            }
            if !seen.insert(device.id.as_str()) {
                issues.push(format!("duplicate device id {}", device.id));
            }
        }
        if Channel::of_site(&self.site_version).is_some() {
            issues.push("site_version must not contain a channel segment".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Invalid catalog:\n - {}",
                issues.join("\n - ")
            )))
        }
    }
}

impl Default for SiteCatalog {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            site_version: default_site_version(),
        }
    }
}

fn default_site_version() -> String {
    "V6_1".into()
}

fn default_devices() -> Vec<Device> {
    vec![
        Device::new("UTIS0001", "Ingleside on the Bay", 27.8240, -97.2130),
        Device::new("UTIS0002", "IOB Sandpiper", 27.8235, -97.0660),
        Device::new("UTIS0003", "IOB Sunset", 27.8420, -97.0930),
        Device::new("UTIS0004", "Gregory", 27.9220, -97.2925),
        Device::new("UTIS0005", "Hillcrest", 27.8090, -97.4070),
        Device::new("UTIS0006", "South Exxon-Sabic", 27.9000, -97.3200),
        Device::new("UTIS0007", "North Exxon-Sabic", 27.9300, -97.3200),
        Device::new("UTIS0008", "Port Aransas", 27.8339, -97.0611),
        Device::new("UTIS0009", "Aransas Pass", 27.9095, -97.1500),
        Device::new("UTIS0010", "Ingleside", 27.8800, -97.2100),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_expands_to_twenty_sites() {
        let catalog = SiteCatalog::default();
        let sites = catalog.sites();
        assert_eq!(sites.len(), 20);
        assert_eq!(sites[0].as_str(), "UTIS0001-TH-V6_1");
        assert_eq!(sites[1].as_str(), "UTIS0001-VOC-V6_1");
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_families_are_disjoint() {
        let catalog = SiteCatalog::default();
        let th: HashSet<_> = catalog.sites_for(Channel::Th).into_iter().collect();
        let voc: HashSet<_> = catalog.sites_for(Channel::Voc).into_iter().collect();
        assert!(th.is_disjoint(&voc));
        assert!(th.iter().all(|s| s.is_channel(Channel::Th)));
        assert!(voc.iter().all(|s| s.is_channel(Channel::Voc)));
    }

    #[test]
    fn test_unversioned_catalog() {
        let catalog = SiteCatalog::new(
            vec![Device::new("A", "", 0.0, 0.0), Device::new("B", "", 0.0, 0.0)],
            "",
        );
        let ids: Vec<String> = catalog.sites().iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, vec!["A-TH", "A-VOC", "B-TH", "B-VOC"]);
    }

    #[test]
    fn test_validate_rejects_ambiguous_ids() {
        let catalog = SiteCatalog::new(
            vec![
                Device::new("X-TH", "", 0.0, 0.0),
                Device::new("Y", "", 0.0, 0.0),
                Device::new("Y", "", 0.0, 0.0),
            ],
            "V1",
        );
        let err = catalog.validate().unwrap_err().to_string();
        assert!(err.contains("channel segment"), "{}", err);
        assert!(err.contains("duplicate device id Y"), "{}", err);
    }
}
