//! Defines the interface drivers implement to participate in device
//! discovery, configuration, and resource I/O (§4.2).
//!
//! Only eleven methods are required; everything else is an optional
//! hook the core checks for before calling, defaulted here to a no-op
//! (or, where a meaningful failure exists, to `Error::NotFound`) so a
//! driver only overrides what it actually needs.

pub mod config;
pub mod registry;

pub use config::DriverConfig;
pub use registry::Registry;

use crate::model::{Device, Endpoint, Resource};
use crate::types::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The name a driver instance is registered under (`[[driver]] name`
/// in the config file). Cheaply clonable; shared across every task
/// that needs to refer back to the driver by name.
pub type Name = Arc<str>;

/// A loosely-typed accumulator a driver fills in during
/// `fetchInitialResourceValues` and consumes during `registerResources`
/// (§4.3 steps 7-9). Kept as a flat string map rather than a typed
/// struct because the set of keys a driver populates is open-ended.
#[derive(Debug, Default, Clone)]
pub struct ValueBag(HashMap<String, Option<String>>);

impl ValueBag {
    pub fn new() -> ValueBag {
        ValueBag(HashMap::new())
    }

    /// Records a value for `key`. Passing `None` still marks the key
    /// as present — `addCommonResources` (§4.3 step 8) distinguishes
    /// "no value for this key" from "this key's value is null".
    pub fn set(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.0.get(key).map(|v| v.as_deref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

/// The authorization/parameterization record looked up by
/// `(manufacturer, model, hwVer, fwVer)` during step 2 of the
/// Device-Found Pipeline.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub model: String,
    pub hardware_version: String,
    pub firmware_version: String,
}

/// Carried by `systemPowerEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Resume,
    Shutdown,
}

/// What a driver reports when it finds a device. `uuid` and
/// `device_class` are known up front; `manufacturer`/`model`/version
/// strings come from the hardware itself (read by the driver before
/// calling in) and are what the descriptor lookup keys on.
#[derive(Debug, Clone)]
pub struct DeviceFoundDetails {
    pub uuid: String,
    pub device_class: String,
    pub device_class_version: u32,
    pub manufacturer: String,
    pub model: String,
    pub hardware_version: String,
    pub firmware_version: String,
    /// True when recovering an orphaned device rather than adding one
    /// the gateway has never seen before.
    pub recovery_mode: bool,
}

/// The callback surface a driver drives to push a discovered or
/// recovered device through the Device-Found Pipeline (§4.3).
/// Implemented by the core; a driver never holds a reference to the
/// core itself (drivers only depend on this crate, not on the binary
/// that assembles the core), so it's handed a [`SinkHandle`] instead.
#[async_trait]
pub trait DeviceSink: Send + Sync {
    async fn device_found(
        &self,
        details: DeviceFoundDetails,
        driver_name: Name,
        never_reject: bool,
    ) -> bool;
}

/// A [`DeviceSink`] a driver can hold from the moment it's constructed,
/// before the core that will eventually answer `device_found` calls
/// even exists. The binary wires the two together once the core is
/// built by calling [`SinkHandle::bind`]; any call made before that
/// (there shouldn't be one — drivers aren't started until after
/// binding) is treated as a rejection.
#[derive(Clone, Default)]
pub struct SinkHandle(Arc<tokio::sync::OnceCell<Arc<dyn DeviceSink>>>);

impl SinkHandle {
    pub fn new() -> SinkHandle {
        SinkHandle(Arc::new(tokio::sync::OnceCell::new()))
    }

    /// Binds the real sink. Only the first call has any effect.
    pub fn bind(&self, sink: Arc<dyn DeviceSink>) {
        let _ = self.0.set(sink);
    }
}

#[async_trait]
impl DeviceSink for SinkHandle {
    async fn device_found(
        &self,
        details: DeviceFoundDetails,
        driver_name: Name,
        never_reject: bool,
    ) -> bool {
        match self.0.get() {
            Some(sink) => sink.device_found(details, driver_name, never_reject).await,
            None => false,
        }
    }
}

/// The contract every device driver fulfills. The core is the only
/// caller of this trait; drivers call back into the core through the
/// resource-update and discovery APIs instead of holding a reference
/// to it.
///
/// Drivers are loaded dynamically from the config file, so this trait
/// is used behind `Arc<dyn Driver>` and needs `#[async_trait]` rather
/// than the return-position-`impl Future` style used elsewhere in this
/// crate.
#[async_trait]
pub trait Driver: Send + Sync {
    fn driver_name(&self) -> &str;

    fn supported_device_classes(&self) -> &[String];

    /// Runs the driver instance. Expected to block until shutdown is
    /// requested or a fatal error occurs; the supervisor restarts the
    /// driver (with backoff) if this ever returns `Err` or the task
    /// panics. Drivers needing mutable state use interior mutability
    /// (`Mutex`, atomics) since this trait is always used behind
    /// `Arc<dyn Driver>`.
    async fn startup(&self) -> Result<(), Error>;

    async fn shutdown(&self) -> Result<(), Error>;

    async fn discover_devices(&self, class: &str) -> Result<(), Error>;

    async fn stop_discovering_devices(&self, class: &str) -> Result<(), Error>;

    async fn configure_device(
        &self,
        device: &mut Device,
        descriptor: Option<&DeviceDescriptor>,
    ) -> Result<(), Error>;

    async fn fetch_initial_resource_values(
        &self,
        device: &Device,
        bag: &mut ValueBag,
    ) -> Result<(), Error>;

    async fn register_resources(&self, device: &mut Device, bag: &ValueBag) -> Result<(), Error>;

    async fn read_resource(
        &self,
        device: &Device,
        res: &Resource,
    ) -> Result<Option<String>, Error>;

    async fn write_resource(
        &self,
        device: &Device,
        res: &Resource,
        prev: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, Error>;

    async fn device_removed(&self, device: &Device);

    // --- optional hooks, default to no-op ---

    async fn execute_resource(
        &self,
        _device: &Device,
        _res: &Resource,
        _arg: Option<&str>,
    ) -> Result<(bool, Option<String>), Error> {
        Err(Error::UnauthorizedMode(String::from(
            "executeResource not supported by this driver",
        )))
    }

    async fn recover_devices(&self, _class: &str) -> Result<(), Error> {
        Err(Error::NotFound)
    }

    /// Advertises whether [`Driver::recover_devices`] is implemented,
    /// so the discovery coordinator can validate an orphan-finding
    /// request up front instead of discovering the gap mid-session.
    fn supports_recover_devices(&self) -> bool {
        false
    }

    async fn process_device_descriptor(
        &self,
        _device: &mut Device,
        _descriptor: &DeviceDescriptor,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn device_needs_reconfiguring(&self, _device: &Device) -> bool {
        false
    }

    fn get_device_class_version(&self, _class: &str) -> Option<u32> {
        None
    }

    async fn synchronize_device(&self, _device: &mut Device) -> Result<(), Error> {
        Ok(())
    }

    async fn device_persisted(&self, _device: &Device) {}

    async fn endpoint_disabled(&self, _endpoint: &Endpoint) {}

    async fn communication_failed(&self, _device: &Device) {}

    async fn communication_restored(&self, _device: &Device) {}

    fn subsystem_initialized(&self, _name: &str) {}

    /// Called once per comm-fail on a sibling driver sharing
    /// [`Driver::subsystem_name`] (e.g. every ZigBee driver on one
    /// radio), so a driver can flag that the shared transport — not
    /// just one device — may be the actual problem.
    fn subsystem_comm_failed(&self, _name: &str) {}

    fn system_power_event(&self, _kind: PowerEvent) {}

    fn property_changed(&self, _key: &str, _value: &str) {}

    fn pre_restore_config(&self) {}

    async fn restore_config(&self, _temp_dir: &str, _dynamic_path: &str) -> Result<bool, Error> {
        Ok(true)
    }

    fn post_restore_config(&self) {}

    /// Groups drivers that share an underlying transport (e.g. all
    /// ZigBee drivers on one radio) so the watchdog can notify the
    /// transport once instead of once per driver.
    fn subsystem_name(&self) -> Option<&str> {
        None
    }
}
