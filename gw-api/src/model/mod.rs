//! The data model: devices, endpoints, resources, and metadata (§3).
//!
//! Back-pointers are identifiers, not handles: a [`Resource`] doesn't
//! know its own URI, and an [`Endpoint`] doesn't hold its owning
//! device's uuid. The owner always supplies that context (see
//! [`crate::uri::Uri`]), which is what keeps renaming/reparenting a
//! single-field change instead of a tree walk.

pub mod mode;
pub mod value;

use crate::types::Error;
use mode::Mode;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// An open vocabulary of resource/device-class/profile kinds. Backends
/// and drivers mint their own; the core never enumerates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType(Cow<'static, str>);

impl ResourceType {
    pub const fn from_static(s: &'static str) -> ResourceType {
        ResourceType(Cow::Borrowed(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        ResourceType(Cow::Owned(s))
    }
}

impl From<&str> for ResourceType {
    fn from(s: &str) -> Self {
        ResourceType(Cow::Owned(s.to_string()))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Governs whether a resource's last-known value is handed back
/// immediately on read or always re-fetched from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachingPolicy {
    /// Serve the cached value; a driver push updates it out of band.
    Always,
    /// Never trust the cache; every read calls through to the driver.
    Never,
}

/// A single addressable value hanging off a device or an endpoint.
#[derive(Debug, Clone)]
pub struct Resource {
    id: String,
    resource_type: ResourceType,
    value: Option<String>,
    mode: Mode,
    caching_policy: CachingPolicy,
    date_of_last_sync_millis: u64,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: ResourceType, mode: Mode) -> Resource {
        Resource {
            id: id.into(),
            resource_type,
            value: None,
            mode,
            caching_policy: CachingPolicy::Always,
            date_of_last_sync_millis: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn typed<T: value::Typed>(&self) -> Result<Option<T>, Error> {
        value::parse_opt(&self.value)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn caching_policy(&self) -> CachingPolicy {
        self.caching_policy
    }

    pub fn set_caching_policy(&mut self, policy: CachingPolicy) {
        self.caching_policy = policy;
    }

    pub fn date_of_last_sync_millis(&self) -> u64 {
        self.date_of_last_sync_millis
    }

    /// Writes a new value and bumps the sync timestamp. Callers are
    /// responsible for mode checks (`WRITEABLE`) before calling this;
    /// this method only enforces storage-level invariants.
    pub fn set_value(&mut self, value: Option<String>, now_millis: u64) {
        self.value = value;
        self.date_of_last_sync_millis = now_millis;
    }

    /// Applies a mode change, honoring the SENSITIVE-is-sticky
    /// invariant (§3 invariant 4, §4.6 `changeResourceMode`).
    pub fn change_mode(&mut self, requested: Mode) {
        self.mode = self.mode.apply_change(requested);
    }
}

/// A named, string-valued annotation attached to a device or endpoint
/// (manufacturer, model number, firmware version, user label, ...).
#[derive(Debug, Clone)]
pub struct Metadata {
    id: String,
    value: Option<String>,
}

impl Metadata {
    pub fn new(id: impl Into<String>, value: Option<String>) -> Metadata {
        Metadata {
            id: id.into(),
            value,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: Option<String>) {
        self.value = value;
    }
}

/// A functional grouping of resources inside a device (a single relay
/// on a multi-gang switch, a single zone on a multi-zone thermostat).
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: String,
    profile: String,
    profile_version: u32,
    enabled: bool,
    resources: HashMap<String, Resource>,
    metadata: HashMap<String, Metadata>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, profile: impl Into<String>, profile_version: u32) -> Endpoint {
        Endpoint {
            id: id.into(),
            profile: profile.into(),
            profile_version,
            enabled: true,
            resources: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn profile_version(&self) -> u32 {
        self.profile_version
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.insert(resource.id().to_string(), resource);
    }

    pub fn metadata(&self, id: &str) -> Option<&Metadata> {
        self.metadata.get(id)
    }

    pub fn metadata_entries(&self) -> impl Iterator<Item = &Metadata> {
        self.metadata.values()
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata.insert(metadata.id().to_string(), metadata);
    }
}

/// A single managed device: everything the gateway knows about one
/// physical piece of equipment.
#[derive(Debug, Clone)]
pub struct Device {
    uuid: String,
    device_class: String,
    device_class_version: u32,
    managing_driver_name: String,
    date_added_millis: u64,
    endpoints: HashMap<String, Endpoint>,
    resources: HashMap<String, Resource>,
    metadata: HashMap<String, Metadata>,
}

impl Device {
    pub fn new(
        uuid: impl Into<String>,
        device_class: impl Into<String>,
        device_class_version: u32,
        managing_driver_name: impl Into<String>,
        date_added_millis: u64,
    ) -> Device {
        Device {
            uuid: uuid.into(),
            device_class: device_class.into(),
            device_class_version,
            managing_driver_name: managing_driver_name.into(),
            date_added_millis,
            endpoints: HashMap::new(),
            resources: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn device_class(&self) -> &str {
        &self.device_class
    }

    pub fn device_class_version(&self) -> u32 {
        self.device_class_version
    }

    pub fn set_device_class_version(&mut self, version: u32) {
        self.device_class_version = version;
    }

    pub fn managing_driver_name(&self) -> &str {
        &self.managing_driver_name
    }

    pub fn date_added_millis(&self) -> u64 {
        self.date_added_millis
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn endpoint_mut(&mut self, id: &str) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoints.insert(endpoint.id().to_string(), endpoint);
    }

    pub fn remove_endpoint(&mut self, id: &str) -> Option<Endpoint> {
        self.endpoints.remove(id)
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.insert(resource.id().to_string(), resource);
    }

    /// Looks up a resource owned directly by the device, falling back
    /// to `None` if it lives on one of the device's endpoints instead
    /// (the caller, typically the resource store, walks endpoints
    /// itself — see §4.1's endpoint-to-device fallback).
    pub fn metadata(&self, id: &str) -> Option<&Metadata> {
        self.metadata.get(id)
    }

    pub fn metadata_entries(&self) -> impl Iterator<Item = &Metadata> {
        self.metadata.values()
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata.insert(metadata.id().to_string(), metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_resource_roundtrip() {
        let mut d = Device::new("abc", "thermostat", 1, "gw-drv-thermostat", 0);

        d.add_resource(Resource::new(
            "setpoint",
            ResourceType::from("temperature"),
            Mode::READABLE | Mode::WRITEABLE,
        ));

        let r = d.resource_mut("setpoint").unwrap();
        r.set_value(Some("72".to_string()), 1000);

        assert_eq!(d.resource("setpoint").unwrap().typed::<i64>().unwrap(), Some(72));
        assert_eq!(d.resource("setpoint").unwrap().date_of_last_sync_millis(), 1000);
    }

    #[test]
    fn test_endpoint_nested_under_device() {
        let mut d = Device::new("abc", "switch", 1, "gw-drv-hue", 0);
        let mut ep = Endpoint::new("1", "onoff", 1);

        ep.add_resource(Resource::new("isOn", ResourceType::from("bool"), Mode::READABLE));
        d.add_endpoint(ep);

        assert!(d.endpoint("1").unwrap().resource("isOn").is_some());
    }
}
