use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A remote device eligible for session assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device name as known to the device directory (e.g. "Pixel 8").
    pub name: String,
    /// OS version string (e.g. "14.0").
    pub os_version: String,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.os_version)
    }
}

/// Ordered, fixed-size pool of devices for one run.
///
/// Immutable after construction; device for ticket `t` is always
/// `devices[t % len]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePool {
    name: String,
    devices: Vec<Device>,
}

impl DevicePool {
    /// Build a pool. Fails on an empty device list so that the
    /// "empty pool" condition surfaces before the first allocation.
    pub fn new(name: impl Into<String>, devices: Vec<Device>) -> Result<Self, crate::GridError> {
        let name = name.into();
        if devices.is_empty() {
            return Err(crate::GridError::EmptyPool { pool: name });
        }
        Ok(Self { name, devices })
    }

    /// Pool name; distinct names map to distinct shared counters.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device for a ticket, by modulo indexing.
    pub fn device_for(&self, ticket: Ticket) -> &Device {
        &self.devices[(ticket.value() as usize) % self.devices.len()]
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

/// Globally ordered allocation ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(u64);

impl Ticket {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one pool allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub device: Device,
    pub ticket: Ticket,
    /// True when the ticket came from the time+pid fallback instead of
    /// the shared counter. Degraded tickets are outside the {0..M-1}
    /// sequence and carry a small collision probability.
    pub degraded: bool,
}

/// App build metadata from the build directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppBuild {
    /// Version string (e.g. "7.42.0").
    pub version: String,
    /// Opaque download handle the session backend understands
    /// (e.g. an upload URL or a "app_url" token).
    pub handle: String,
    /// Build classifier (e.g. "debug", "release", "beta").
    #[serde(default)]
    pub classifier: Option<String>,
}

/// Output format for CLI responses
#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> Device {
        Device {
            name: name.to_string(),
            os_version: "14.0".to_string(),
        }
    }

    #[test]
    fn test_device_display() {
        assert_eq!(device("Pixel 8").to_string(), "Pixel 8 (14.0)");
    }

    #[test]
    fn test_pool_rejects_empty() {
        let err = DevicePool::new("main", vec![]).unwrap_err();
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn test_pool_modulo_indexing() {
        let pool =
            DevicePool::new("main", vec![device("a"), device("b"), device("c")]).unwrap();
        assert_eq!(pool.device_for(Ticket::new(0)).name, "a");
        assert_eq!(pool.device_for(Ticket::new(2)).name, "c");
        assert_eq!(pool.device_for(Ticket::new(3)).name, "a");
        assert_eq!(pool.device_for(Ticket::new(7)).name, "b");
    }

    #[test]
    fn test_ticket_ordering() {
        assert!(Ticket::new(1) < Ticket::new(2));
        assert_eq!(Ticket::new(5).to_string(), "5");
    }

    #[test]
    fn test_ticket_serde_transparent() {
        let json = serde_json::to_string(&Ticket::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: Ticket = serde_json::from_str("42").unwrap();
        assert_eq!(back, Ticket::new(42));
    }

    #[test]
    fn test_allocation_roundtrip() {
        let alloc = Allocation {
            device: device("Pixel 8"),
            ticket: Ticket::new(3),
            degraded: false,
        };
        let json = serde_json::to_string(&alloc).unwrap();
        let back: Allocation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alloc);
    }
}
