//! Provides a simple, in-memory back-end for the gateway core.
//!
//! Every managed device lives entirely in a `HashMap` guarded by the
//! core's own store mutex (this crate adds no locking of its own).
//! If `state_file` is configured, the whole table is serialized to
//! JSON after each mutating call and reloaded from it at startup;
//! the on-disk format is this crate's own and isn't meant to be
//! shared with any other backend.

use async_trait::async_trait;
use gw_api::model::mode::Mode;
use gw_api::model::{CachingPolicy, Device, Endpoint, Metadata, Resource, ResourceType};
use gw_api::store::ResourceStore;
use gw_api::uri::Uri;
use gw_api::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

#[derive(Serialize, Deserialize)]
struct ResourceDto {
    id: String,
    resource_type: String,
    value: Option<String>,
    mode_bits: u16,
    caching_never: bool,
    date_of_last_sync_millis: u64,
}

impl From<&Resource> for ResourceDto {
    fn from(r: &Resource) -> Self {
        ResourceDto {
            id: r.id().to_string(),
            resource_type: r.resource_type().as_str().to_string(),
            value: r.value().map(String::from),
            mode_bits: r.mode().bits(),
            caching_never: r.caching_policy() == CachingPolicy::Never,
            date_of_last_sync_millis: r.date_of_last_sync_millis(),
        }
    }
}

impl From<ResourceDto> for Resource {
    fn from(dto: ResourceDto) -> Self {
        let mut r = Resource::new(
            dto.id,
            ResourceType::from(dto.resource_type),
            Mode::from_bits(dto.mode_bits),
        );

        r.set_value(dto.value, dto.date_of_last_sync_millis);
        if dto.caching_never {
            r.set_caching_policy(CachingPolicy::Never);
        }
        r
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataDto {
    id: String,
    value: Option<String>,
}

impl From<&Metadata> for MetadataDto {
    fn from(m: &Metadata) -> Self {
        MetadataDto {
            id: m.id().to_string(),
            value: m.value().map(String::from),
        }
    }
}

impl From<MetadataDto> for Metadata {
    fn from(dto: MetadataDto) -> Self {
        Metadata::new(dto.id, dto.value)
    }
}

#[derive(Serialize, Deserialize)]
struct EndpointDto {
    id: String,
    profile: String,
    profile_version: u32,
    enabled: bool,
    resources: Vec<ResourceDto>,
    metadata: Vec<MetadataDto>,
}

impl From<&Endpoint> for EndpointDto {
    fn from(ep: &Endpoint) -> Self {
        EndpointDto {
            id: ep.id().to_string(),
            profile: ep.profile().to_string(),
            profile_version: ep.profile_version(),
            enabled: ep.enabled(),
            resources: ep.resources().map(ResourceDto::from).collect(),
            metadata: ep.metadata_entries().map(MetadataDto::from).collect(),
        }
    }
}

impl From<EndpointDto> for Endpoint {
    fn from(dto: EndpointDto) -> Self {
        let mut ep = Endpoint::new(dto.id, dto.profile, dto.profile_version);

        ep.set_enabled(dto.enabled);
        for r in dto.resources {
            ep.add_resource(r.into());
        }
        for m in dto.metadata {
            ep.set_metadata(m.into());
        }
        ep
    }
}

#[derive(Serialize, Deserialize)]
struct DeviceDto {
    uuid: String,
    device_class: String,
    device_class_version: u32,
    managing_driver_name: String,
    date_added_millis: u64,
    endpoints: Vec<EndpointDto>,
    resources: Vec<ResourceDto>,
    metadata: Vec<MetadataDto>,
}

impl From<&Device> for DeviceDto {
    fn from(d: &Device) -> Self {
        DeviceDto {
            uuid: d.uuid().to_string(),
            device_class: d.device_class().to_string(),
            device_class_version: d.device_class_version(),
            managing_driver_name: d.managing_driver_name().to_string(),
            date_added_millis: d.date_added_millis(),
            endpoints: d.endpoints().map(EndpointDto::from).collect(),
            resources: d.resources().map(ResourceDto::from).collect(),
            metadata: d.metadata_entries().map(MetadataDto::from).collect(),
        }
    }
}

impl From<DeviceDto> for Device {
    fn from(dto: DeviceDto) -> Self {
        let mut d = Device::new(
            dto.uuid,
            dto.device_class,
            dto.device_class_version,
            dto.managing_driver_name,
            dto.date_added_millis,
        );

        for r in dto.resources {
            d.add_resource(r.into());
        }
        for m in dto.metadata {
            d.set_metadata(m.into());
        }
        for ep in dto.endpoints {
            d.add_endpoint(ep.into());
        }
        d
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    devices: Vec<DeviceDto>,
    #[serde(default)]
    system_properties: HashMap<String, String>,
}

/// An in-memory [`ResourceStore`], optionally backed by a JSON file.
pub struct MemoryStore {
    devices: HashMap<String, Device>,
    system_properties: HashMap<String, String>,
    state_file: Option<PathBuf>,
}

impl MemoryStore {
    /// Loads `state_file` if given and it already exists; otherwise
    /// starts empty. A missing file isn't an error (first run); a
    /// present-but-unparseable one is.
    pub fn new(state_file: Option<&str>) -> Result<MemoryStore> {
        let state_file = state_file.map(PathBuf::from);
        let mut snapshot = Snapshot::default();

        if let Some(path) = &state_file {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    snapshot = serde_json::from_str(&contents).map_err(|e| {
                        Error::StoreFailure(format!("malformed state file: {}", e))
                    })?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::StoreFailure(format!(
                        "failed to read state file: {}",
                        e
                    )))
                }
            }
        }

        Ok(MemoryStore {
            devices: snapshot
                .devices
                .into_iter()
                .map(|dto| (dto.uuid.clone(), Device::from(dto)))
                .collect(),
            system_properties: snapshot.system_properties,
            state_file,
        })
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let snapshot = Snapshot {
            devices: self.devices.values().map(DeviceDto::from).collect(),
            system_properties: self.system_properties.clone(),
        };

        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::StoreFailure(format!("failed to serialize state: {}", e)))?;

        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::StoreFailure(format!("failed to write state file: {}", e)))
    }

    fn resolve_resource(&self, uri: &Uri) -> Option<Resource> {
        let device = self.devices.get(uri.device_uuid())?;
        let id = uri.leaf_id()?;

        let direct = match uri.endpoint_id() {
            Some(ep_id) => device.endpoint(ep_id).and_then(|ep| ep.resource(id)),
            None => device.resource(id),
        };

        // §4.1: if an endpoint-scoped resource isn't found, retry
        // against the root device with the same leaf id.
        direct
            .or_else(|| device.resource(id))
            .cloned()
    }

    fn resolve_metadata(&self, uri: &Uri) -> Option<Metadata> {
        let device = self.devices.get(uri.device_uuid())?;
        let id = uri.leaf_id()?;

        let direct = match uri.endpoint_id() {
            Some(ep_id) => device.endpoint(ep_id).and_then(|ep| ep.metadata(id)),
            None => device.metadata(id),
        };

        direct.or_else(|| device.metadata(id)).cloned()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_device(&self, uuid: &str) -> Result<Option<Device>> {
        Ok(self.devices.get(uuid).cloned())
    }

    async fn get_all_devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.values().cloned().collect())
    }

    async fn get_endpoint(&self, device_uuid: &str, endpoint_id: &str) -> Result<Option<Endpoint>> {
        Ok(self
            .devices
            .get(device_uuid)
            .and_then(|d| d.endpoint(endpoint_id))
            .cloned())
    }

    async fn get_resource_by_uri(&self, uri: &Uri) -> Result<Option<Resource>> {
        Ok(self.resolve_resource(uri))
    }

    async fn get_metadata_by_uri(&self, uri: &Uri) -> Result<Option<Metadata>> {
        Ok(self.resolve_metadata(uri))
    }

    async fn get_resources_by_uri_regex(&self, re: &regex::Regex) -> Result<Vec<(Uri, Resource)>> {
        let mut out = Vec::new();

        for device in self.devices.values() {
            for r in device.resources() {
                if let Ok(uri) = Uri::device_resource(device.uuid(), r.id()) {
                    if re.is_match(&uri.to_string()) {
                        out.push((uri, r.clone()));
                    }
                }
            }
            for ep in device.endpoints() {
                for r in ep.resources() {
                    if let Ok(uri) = Uri::endpoint_resource(device.uuid(), ep.id(), r.id()) {
                        if re.is_match(&uri.to_string()) {
                            out.push((uri, r.clone()));
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    async fn get_metadata_by_uri_regex(&self, re: &regex::Regex) -> Result<Vec<(Uri, Metadata)>> {
        let mut out = Vec::new();

        for device in self.devices.values() {
            for m in device.metadata_entries() {
                if let Ok(uri) = Uri::device_metadata(device.uuid(), m.id()) {
                    if re.is_match(&uri.to_string()) {
                        out.push((uri, m.clone()));
                    }
                }
            }
            for ep in device.endpoints() {
                for m in ep.metadata_entries() {
                    if let Ok(uri) = Uri::endpoint_metadata(device.uuid(), ep.id(), m.id()) {
                        if re.is_match(&uri.to_string()) {
                            out.push((uri, m.clone()));
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    async fn get_devices_by_device_class(&self, class: &str) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .values()
            .filter(|d| d.device_class() == class)
            .cloned()
            .collect())
    }

    async fn get_devices_by_profile(&self, profile: &str) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .values()
            .filter(|d| d.endpoints().any(|ep| ep.profile() == profile))
            .cloned()
            .collect())
    }

    async fn get_devices_by_driver(&self, driver_name: &str) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .values()
            .filter(|d| d.managing_driver_name() == driver_name)
            .cloned()
            .collect())
    }

    async fn get_devices_by_metadata(&self, id: &str, value_eq: Option<&str>) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .values()
            .filter(|d| match d.metadata(id) {
                Some(m) => value_eq.is_none_or(|v| m.value() == Some(v)),
                None => false,
            })
            .cloned()
            .collect())
    }

    async fn add_device(&mut self, device: Device) -> Result<()> {
        self.devices.insert(device.uuid().to_string(), device);
        self.persist().await
    }

    async fn remove_device_by_id(&mut self, uuid: &str) -> Result<bool> {
        let removed = self.devices.remove(uuid).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn save_endpoint(&mut self, device_uuid: &str, endpoint: Endpoint, lazy: bool) -> Result<()> {
        let device = self
            .devices
            .get_mut(device_uuid)
            .ok_or(Error::NotFound)?;

        device.add_endpoint(endpoint);
        if lazy {
            Ok(())
        } else {
            self.persist().await
        }
    }

    async fn add_endpoint(&mut self, device_uuid: &str, endpoint: Endpoint) -> Result<()> {
        self.save_endpoint(device_uuid, endpoint, false).await
    }

    async fn save_resource(&mut self, uri: &Uri, resource: Resource, lazy: bool) -> Result<()> {
        if uri.leaf_id() != Some(resource.id()) {
            return Err(Error::InvalidArgument(format!(
                "uri {} does not address resource id {}",
                uri,
                resource.id()
            )));
        }

        let device = self
            .devices
            .get_mut(uri.device_uuid())
            .ok_or(Error::NotFound)?;

        match uri.endpoint_id() {
            Some(ep_id) => {
                let ep = device.endpoint_mut(ep_id).ok_or(Error::NotFound)?;
                ep.add_resource(resource);
            }
            None => device.add_resource(resource),
        }

        if lazy {
            Ok(())
        } else {
            self.persist().await
        }
    }

    async fn save_metadata(&mut self, uri: &Uri, metadata: Metadata, lazy: bool) -> Result<()> {
        if uri.leaf_id() != Some(metadata.id()) {
            return Err(Error::InvalidArgument(format!(
                "uri {} does not address metadata id {}",
                uri,
                metadata.id()
            )));
        }

        let device = self
            .devices
            .get_mut(uri.device_uuid())
            .ok_or(Error::NotFound)?;

        match uri.endpoint_id() {
            Some(ep_id) => {
                let ep = device.endpoint_mut(ep_id).ok_or(Error::NotFound)?;
                ep.set_metadata(metadata);
            }
            None => device.set_metadata(metadata),
        }

        if lazy {
            Ok(())
        } else {
            self.persist().await
        }
    }

    async fn set_system_property(&mut self, key: &str, value: &str) -> Result<()> {
        self.system_properties
            .insert(key.to_string(), value.to_string());
        self.persist().await
    }

    async fn get_system_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self.system_properties.get(key).cloned())
    }

    async fn reload(&mut self) -> Result<()> {
        let Some(path) = self.state_file.clone() else {
            return Ok(());
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::StoreFailure(format!("failed to read state file: {}", e)))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .map_err(|e| Error::StoreFailure(format!("malformed state file: {}", e)))?;

        self.devices = snapshot
            .devices
            .into_iter()
            .map(|dto| (dto.uuid.clone(), Device::from(dto)))
            .collect();
        self.system_properties = snapshot.system_properties;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_api::model::mode::Mode;

    fn sample_device() -> Device {
        let mut d = Device::new("abc", "thermostat", 1, "gw-drv-thermostat", 0);

        d.add_resource(Resource::new(
            "setpoint",
            ResourceType::from("temperature"),
            Mode::READABLE | Mode::WRITEABLE,
        ));
        d
    }

    #[tokio::test]
    async fn test_add_and_get_device() {
        let mut store = MemoryStore::new(None).unwrap();

        store.add_device(sample_device()).await.unwrap();

        let d = store.get_device("abc").await.unwrap().unwrap();
        assert_eq!(d.device_class(), "thermostat");
    }

    #[tokio::test]
    async fn test_resource_endpoint_fallback() {
        let mut store = MemoryStore::new(None).unwrap();
        let mut d = sample_device();

        d.add_resource(Resource::new("label", ResourceType::from("string"), Mode::READABLE));
        let ep = Endpoint::new("1", "onoff", 1);
        d.add_endpoint(ep);
        store.add_device(d).await.unwrap();

        let uri = Uri::endpoint_resource("abc", "1", "label").unwrap();
        let found = store.get_resource_by_uri(&uri).await.unwrap();

        assert!(found.is_some(), "fallback to device-level resource should succeed");
    }

    #[tokio::test]
    async fn test_remove_device() {
        let mut store = MemoryStore::new(None).unwrap();

        store.add_device(sample_device()).await.unwrap();
        assert!(store.remove_device_by_id("abc").await.unwrap());
        assert!(!store.remove_device_by_id("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_resources_by_uri_regex() {
        let mut store = MemoryStore::new(None).unwrap();

        store.add_device(sample_device()).await.unwrap();

        let re = regex::Regex::new(r"^/abc/r/.*$").unwrap();
        let matches = store.get_resources_by_uri_regex(&re).await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0.to_string(), "/abc/r/setpoint");
    }

    #[tokio::test]
    async fn test_save_resource_rejects_uri_id_mismatch() {
        let mut store = MemoryStore::new(None).unwrap();
        store.add_device(sample_device()).await.unwrap();

        let uri = Uri::device_resource("abc", "setpoint").unwrap();
        let wrong = Resource::new("otherId", ResourceType::from("temperature"), Mode::READABLE);

        let result = store.save_resource(&uri, wrong, false).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_save_metadata_rejects_uri_id_mismatch() {
        let mut store = MemoryStore::new(None).unwrap();
        store.add_device(sample_device()).await.unwrap();

        let uri = Uri::device_metadata("abc", "manufacturer").unwrap();
        let wrong = Metadata::new("model", Some("x".to_string()));

        let result = store.save_metadata(&uri, wrong, false).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
