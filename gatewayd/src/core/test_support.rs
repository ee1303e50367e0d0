//! Shared fixtures for the `#[cfg(test)]` modules in this directory: a
//! scriptable stub driver and a ready-to-use `Core` backed by
//! [`gw_store_memory::MemoryStore`].

use super::{Core, Migrator};
use async_trait::async_trait;
use gw_api::driver::{DeviceDescriptor, DeviceFoundDetails, Driver, ValueBag};
use gw_api::model::mode::Mode;
use gw_api::model::{Device, Resource, ResourceType};
use gw_api::types::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A driver whose every hook can be told to fail, so pipeline tests
/// can exercise each rejection point without a real transport.
pub struct StubDriver {
    pub name: String,
    pub classes: Vec<String>,
    pub subsystem: Option<String>,
    pub fail_configure: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_register: AtomicBool,
    pub comm_failed_calls: AtomicBool,
    pub subsystem_comm_failed_calls: AtomicBool,
    pub device_removed_called: AtomicBool,
}

impl StubDriver {
    pub fn new(name: &str, class: &str) -> StubDriver {
        StubDriver {
            name: name.to_string(),
            classes: vec![class.to_string()],
            subsystem: None,
            fail_configure: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_register: AtomicBool::new(false),
            comm_failed_calls: AtomicBool::new(false),
            subsystem_comm_failed_calls: AtomicBool::new(false),
            device_removed_called: AtomicBool::new(false),
        }
    }

    /// Same as [`StubDriver::new`], but advertising membership in a
    /// shared subsystem, so watchdog tests can exercise the sibling
    /// comm-fail notification path.
    pub fn with_subsystem(name: &str, class: &str, subsystem: &str) -> StubDriver {
        StubDriver {
            subsystem: Some(subsystem.to_string()),
            ..StubDriver::new(name, class)
        }
    }
}

#[async_trait]
impl Driver for StubDriver {
    fn driver_name(&self) -> &str {
        &self.name
    }

    fn supported_device_classes(&self) -> &[String] {
        &self.classes
    }

    async fn startup(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn discover_devices(&self, _class: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn stop_discovering_devices(&self, _class: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn configure_device(
        &self,
        device: &mut Device,
        _descriptor: Option<&DeviceDescriptor>,
    ) -> Result<(), Error> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(Error::DriverFailure("configure_device told to fail".to_string()));
        }

        device.add_resource(Resource::new("label", ResourceType::from("string"), Mode::READABLE));
        Ok(())
    }

    async fn fetch_initial_resource_values(
        &self,
        _device: &Device,
        bag: &mut ValueBag,
    ) -> Result<(), Error> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::DriverFailure("fetch_initial_resource_values told to fail".to_string()));
        }

        bag.set("label", Some("stub".to_string()));
        Ok(())
    }

    async fn register_resources(&self, device: &mut Device, bag: &ValueBag) -> Result<(), Error> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(Error::DriverFailure("register_resources told to fail".to_string()));
        }

        if let Some(label) = bag.get("label").flatten() {
            if let Some(res) = device.resource_mut("label") {
                res.set_value(Some(label.to_string()), 0);
            }
        }
        Ok(())
    }

    async fn read_resource(&self, _device: &Device, res: &Resource) -> Result<Option<String>, Error> {
        Ok(res.value().map(String::from))
    }

    async fn write_resource(
        &self,
        _device: &Device,
        _res: &Resource,
        _prev: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, Error> {
        Ok(new.is_some())
    }

    async fn device_removed(&self, _device: &Device) {
        self.device_removed_called.store(true, Ordering::SeqCst);
    }

    async fn communication_failed(&self, _device: &Device) {
        self.comm_failed_calls.store(true, Ordering::SeqCst);
    }

    fn subsystem_comm_failed(&self, _name: &str) {
        self.subsystem_comm_failed_calls.store(true, Ordering::SeqCst);
    }

    fn subsystem_name(&self) -> Option<&str> {
        self.subsystem.as_deref()
    }
}

/// A migrator that always hands back a fixed device, so pipeline tests
/// can exercise the migration branch without a real legacy-device
/// lookup.
pub struct StubMigrator {
    pub device: Device,
}

#[async_trait]
impl Migrator for StubMigrator {
    async fn migrate(&self, _details: &DeviceFoundDetails) -> Option<Device> {
        Some(self.device.clone())
    }
}

/// A core wired to an empty in-memory store, with no descriptor
/// collaborator and no IP-recovery collaborator — the configuration
/// every pipeline/discovery/resource-update test starts from.
pub fn make_core() -> Arc<Core> {
    make_core_with_registry(gw_api::driver::Registry::new())
}

/// Same as [`make_core`], but with a pre-populated registry — needed
/// by any test that exercises a code path looking a driver up by name
/// (e.g. the watchdog, or `DeviceSink::device_found`'s own lookup)
/// rather than being handed an `Arc<dyn Driver>` directly.
pub fn make_core_with_registry(registry: gw_api::driver::Registry) -> Arc<Core> {
    let store = gw_store_memory::MemoryStore::new(None).expect("empty store always constructs");
    Core::new(Box::new(store), registry, None, None, None)
}

/// Same as [`make_core_with_registry`], but with `migrator` installed.
pub fn make_core_with_migrator(
    registry: gw_api::driver::Registry,
    migrator: Arc<dyn Migrator>,
) -> Arc<Core> {
    let store = gw_store_memory::MemoryStore::new(None).expect("empty store always constructs");
    Core::new(Box::new(store), registry, None, None, Some(migrator))
}
