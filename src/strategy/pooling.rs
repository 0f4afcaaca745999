//! Pooling strategies: which pool a device joins.

use crate::device::{DeviceInfo, DevicePoolId};

/// Assigns a device to a pool.
///
/// The pool id must be a pure function of the device's identity — the same
/// device always lands in the same pool for the run's lifetime.
pub trait PoolingStrategy: Send + Sync {
    /// Returns the pool the given device belongs to.
    fn pool_for(&self, device: &DeviceInfo) -> DevicePoolId;
}

/// Puts every device into one shared pool.
#[derive(Debug, Default)]
pub struct OmniPooling;

impl PoolingStrategy for OmniPooling {
    fn pool_for(&self, _device: &DeviceInfo) -> DevicePoolId {
        DevicePoolId::new("omni")
    }
}

/// Groups devices by operating system version.
#[derive(Debug, Default)]
pub struct OsVersionPooling;

impl PoolingStrategy for OsVersionPooling {
    fn pool_for(&self, device: &DeviceInfo) -> DevicePoolId {
        DevicePoolId::new(format!("os-{}", device.os_version))
    }
}

/// Groups devices by model name.
#[derive(Debug, Default)]
pub struct ModelPooling;

impl PoolingStrategy for ModelPooling {
    fn pool_for(&self, device: &DeviceInfo) -> DevicePoolId {
        DevicePoolId::new(device.model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(serial: &str, model: &str, os_version: &str) -> DeviceInfo {
        DeviceInfo {
            serial: serial.to_string(),
            model: model.to_string(),
            os_version: os_version.to_string(),
            api_level: 33,
            features: Vec::new(),
        }
    }

    #[test]
    fn test_omni_puts_everything_together() {
        let strategy = OmniPooling;
        let a = strategy.pool_for(&device("a", "Pixel 7", "13"));
        let b = strategy.pool_for(&device("b", "iPhone 15", "17.2"));
        assert_eq!(a, b);
        assert_eq!(a, DevicePoolId::new("omni"));
    }

    #[test]
    fn test_os_version_splits_by_version() {
        let strategy = OsVersionPooling;
        let a = strategy.pool_for(&device("a", "Pixel 7", "13"));
        let b = strategy.pool_for(&device("b", "Pixel 7", "14"));
        assert_ne!(a, b);
        assert_eq!(a, DevicePoolId::new("os-13"));
    }

    #[test]
    fn test_model_splits_by_model() {
        let strategy = ModelPooling;
        let a = strategy.pool_for(&device("a", "Pixel 7", "13"));
        let b = strategy.pool_for(&device("b", "Pixel 8", "13"));
        assert_ne!(a, b);
    }
}
