//! In-memory device registry: the merge of configured and discovered
//! devices, addressed by index (per the design note against holding
//! pointers into a table that can reallocate during discovery).

use crate::protocol::Version;
use std::net::IpAddr;
use std::str::FromStr;

/// Per-device controller state, driven by [`crate::controller::Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    Sensing,
    Commanding,
    AwaitingConfirmation,
    Silent,
}

/// One known device: configured, discovered, or both.
///
/// The teacher's per-device actor owns a live `TcpStream`; this table does
/// not. [`crate::controller::Controller`] opens, uses, and closes the
/// socket within a single tick's exchange, so the table only needs to know
/// whether an exchange is currently in flight (`busy`) — the "at most one
/// socket open per device" invariant holds because the controller checks
/// this flag before starting a new one.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub model: String,
    pub description: Option<String>,
    pub local_key: String,
    pub version: Version,

    pub ip_address: Option<IpAddr>,
    pub encrypted: bool,
    pub last_detected: u64,

    pub status: bool,
    pub commanded: bool,
    pub pending: u64,
    pub pulse_deadline: u64,
    pub last_sense: u64,
    pub control_point: u32,

    pub state: ControllerState,
    pub busy: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, local_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: String::new(),
            description: None,
            local_key: local_key.into(),
            version: Version::default(),
            ip_address: None,
            encrypted: false,
            last_detected: 0,
            status: false,
            commanded: false,
            pending: 0,
            pulse_deadline: 0,
            last_sense: 0,
            control_point: 0,
            state: ControllerState::Idle,
            busy: false,
        }
    }

    /// Whether a discovery beacon or successful exchange has ever placed
    /// this device on the LAN.
    pub fn detected(&self) -> bool {
        self.last_detected > 0 && self.ip_address.is_some()
    }

    pub fn secret(&self) -> crate::protocol::Secret {
        crate::protocol::Secret::new(self.id.clone(), &self.local_key, self.version)
    }
}

/// The in-memory registry of all known devices, addressed by index.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
    dirty: bool,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.devices.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.id == id)
    }

    /// Authoritative source for `name`, `localKey`, `description`: config.
    /// Merges by `id`; existing discovery-derived fields on a matched
    /// device (model, version, IP, encrypted) are left untouched.
    pub fn merge_config(&mut self, configured: Vec<Device>) {
        for incoming in configured {
            if let Some(index) = self.index_of_id(&incoming.id) {
                let existing = &mut self.devices[index];
                existing.name = incoming.name;
                existing.local_key = incoming.local_key;
                existing.description = incoming.description;
                if !incoming.model.is_empty() {
                    existing.model = incoming.model;
                }
            } else {
                self.devices.push(incoming);
            }
        }
    }

    /// Insert or update a device record from a parsed discovery beacon.
    /// Returns the device's index. A beacon for an unknown `gwId` inserts a
    /// `"new_N"` placeholder and marks the table dirty.
    pub fn observe_beacon(
        &mut self,
        gw_id: &str,
        product_key: &str,
        encrypted: bool,
        version: Option<&str>,
        source_ip: IpAddr,
        now: u64,
    ) -> usize {
        let index = match self.index_of_id(gw_id) {
            Some(index) => index,
            None => {
                let placeholder_name = format!("new_{}", self.devices.len());
                let device = Device::new(gw_id.to_string(), placeholder_name, String::new());
                self.devices.push(device);
                self.dirty = true;
                self.devices.len() - 1
            }
        };

        let device = &mut self.devices[index];
        device.model = product_key.to_string();
        device.encrypted = encrypted;
        if let Some(v) = version.and_then(|s| Version::from_str(s).ok()) {
            device.version = v;
        }
        device.ip_address = Some(source_ip);
        device.last_detected = now;
        if device.state == ControllerState::Silent {
            device.state = ControllerState::Idle;
        }
        index
    }

    /// Look each device's `model` up in the registry and set its
    /// `control_point`. Devices with no matching model keep `control_point
    /// == 0`.
    pub fn resolve_control_points(&mut self, models: &crate::model::ModelRegistry) {
        for device in &mut self.devices {
            device.control_point = models
                .lookup(&device.model)
                .map(|m| m.control_point)
                .unwrap_or(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn unknown_beacon_inserts_placeholder_and_dirties_table() {
        let mut table = DeviceTable::new();
        let index = table.observe_beacon(
            "abc123",
            "keyXYZ",
            true,
            Some("3.3"),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)),
            1000,
        );
        assert_eq!(index, 0);
        let device = table.get(0).unwrap();
        assert_eq!(device.name, "new_0");
        assert_eq!(device.model, "keyXYZ");
        assert_eq!(
            device.ip_address,
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)))
        );
        assert!(table.is_dirty());
    }

    #[test]
    fn known_beacon_updates_in_place_without_redirtying() {
        let mut table = DeviceTable::new();
        table.merge_config(vec![Device::new("abc123", "Lamp", "0123456789abcdef")]);
        table.clear_dirty();

        let index = table.observe_beacon(
            "abc123",
            "keyXYZ",
            true,
            Some("3.3"),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            1000,
        );
        assert_eq!(index, 0);
        assert_eq!(table.get(0).unwrap().name, "Lamp");
        assert!(!table.is_dirty());
    }

    #[test]
    fn silent_device_returns_to_idle_on_next_beacon() {
        let mut table = DeviceTable::new();
        table.merge_config(vec![Device::new("abc123", "Lamp", "0123456789abcdef")]);
        table.get_mut(0).unwrap().state = ControllerState::Silent;

        table.observe_beacon(
            "abc123",
            "keyXYZ",
            false,
            None,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            2000,
        );
        assert_eq!(table.get(0).unwrap().state, ControllerState::Idle);
    }

    #[test]
    fn missing_model_leaves_control_point_zero() {
        let mut table = DeviceTable::new();
        let mut device = Device::new("abc123", "Lamp", "0123456789abcdef");
        device.model = "unmapped".into();
        table.merge_config(vec![device]);

        let models = crate::model::ModelRegistry::new();
        table.resolve_control_points(&models);
        assert_eq!(table.get(0).unwrap().control_point, 0);
    }
}
