// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Registry of device transport backends.
//!
//! The secure serial transport is vendor code; it is supplied by plugins
//! that export `payout_register_backend(*mut c_void)` and call
//! [`RegistrationContext::register_backend`] on the context they receive.
//! The built-in `sim` backend needs no hardware.

use std::collections::HashMap;
use std::path::Path;

use payout_core::{DeviceRole, DynResult, SspTransport};
use tracing::debug;

pub mod sim;

/// Connection details handed to a backend factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAccess {
    Serial {
        path: String,
        baud: u32,
        timeout_ms: u64,
        retry_level: u8,
    },
    Simulated,
}

/// Which device on the shared line a transport talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTarget {
    pub role: DeviceRole,
    pub address: u8,
}

pub type TransportFactory = fn(&TransportAccess, DeviceTarget) -> DynResult<Box<dyn SspTransport>>;

#[derive(Clone, Copy)]
struct BackendEntry {
    factory: TransportFactory,
    serial: bool,
}

/// Context for registering and instantiating transport backends.
#[derive(Clone, Default)]
pub struct RegistrationContext {
    backends: HashMap<String, BackendEntry>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend that drives a serial device node.
    pub fn register_backend(&mut self, name: &str, factory: TransportFactory) {
        self.insert(name, factory, true);
    }

    /// Register a backend that needs no device node.
    pub fn register_virtual_backend(&mut self, name: &str, factory: TransportFactory) {
        self.insert(name, factory, false);
    }

    fn insert(&mut self, name: &str, factory: TransportFactory, serial: bool) {
        self.backends
            .insert(normalize_name(name), BackendEntry { factory, serial });
    }

    pub fn is_backend_registered(&self, name: &str) -> bool {
        self.backends.contains_key(&normalize_name(name))
    }

    /// Whether the backend expects the serial device to exist.
    pub fn needs_serial_device(&self, name: &str) -> bool {
        self.backends
            .get(&normalize_name(name))
            .map(|entry| entry.serial)
            .unwrap_or(false)
    }

    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the transport for one device.
    pub fn build_transport(
        &self,
        name: &str,
        access: &TransportAccess,
        target: DeviceTarget,
    ) -> DynResult<Box<dyn SspTransport>> {
        let entry = self
            .backends
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown transport backend: {}", name))?;
        (entry.factory)(access, target)
    }

    pub fn extend_from(&mut self, other: &RegistrationContext) {
        for (name, entry) in &other.backends {
            self.backends.insert(name.clone(), *entry);
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Register all built-in backends on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_virtual_backend("sim", sim_factory);
}

fn sim_factory(_access: &TransportAccess, target: DeviceTarget) -> DynResult<Box<dyn SspTransport>> {
    let (device, _handle) = sim::SimulatedDevice::new(target.role, target.address);
    debug!("{}: simulated device at 0x{:02X}", target.role, target.address);
    Ok(Box::new(device))
}

/// Check that `path` exists and is a character device before a serial
/// backend is handed to it.
pub fn check_serial_device(path: &str) -> DynResult<()> {
    let metadata = std::fs::metadata(Path::new(path))
        .map_err(|e| format!("opening device {} failed: {}", path, e))?;
    if !is_char_device(&metadata) {
        return Err(format!("{} is not a device", path).into());
    }
    Ok(())
}

#[cfg(unix)]
fn is_char_device(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_char_device()
}

#[cfg(not(unix))]
fn is_char_device(metadata: &std::fs::Metadata) -> bool {
    !metadata.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeviceTarget {
        DeviceTarget {
            role: DeviceRole::Hopper,
            address: 0x10,
        }
    }

    #[test]
    fn test_builtin_sim_is_registered() {
        let mut context = RegistrationContext::new();
        register_builtin_backends_on(&mut context);
        assert!(context.is_backend_registered("SIM"));
        assert!(!context.needs_serial_device("sim"));
        assert_eq!(context.registered_backends(), vec!["sim".to_string()]);
        assert!(context
            .build_transport("sim", &TransportAccess::Simulated, target())
            .is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        let context = RegistrationContext::new();
        let err = context
            .build_transport("itl-ssp", &TransportAccess::Simulated, target())
            .err()
            .expect("unknown backend");
        assert!(err.to_string().contains("itl-ssp"));
    }

    #[test]
    fn test_serial_backends_need_device() {
        let mut context = RegistrationContext::new();
        context.register_backend("ITL-SSP", sim_factory);
        assert!(context.is_backend_registered("itlssp"));
        assert!(context.needs_serial_device("itl_ssp"));

        let mut merged = RegistrationContext::new();
        merged.extend_from(&context);
        assert!(merged.needs_serial_device("itlssp"));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_serial_device() {
        assert!(check_serial_device("/dev/null").is_ok());
        let err = check_serial_device("/").expect_err("directory is not a device");
        assert!(err.to_string().contains("is not a device"));
        assert!(check_serial_device("/nonexistent/ttyACM9").is_err());
    }
}
