//! The Resource Store contract (§4.1): sole authority for persisted
//! and queryable device state.
//!
//! Implementations live in separate backend crates (see
//! `gw-store-memory`) and are held by the core behind
//! `Box<dyn ResourceStore + Send>`, guarded by a single mutex so
//! mutating calls are serialized (§5). `#[async_trait]` is used here
//! for the same reason as [`crate::driver::Driver`]: the concrete
//! backend is chosen at startup from the config file, so this trait
//! needs to be object-safe.

use crate::model::{Device, Endpoint, Metadata, Resource};
use crate::types::Error;
use crate::uri::Uri;
use async_trait::async_trait;

#[async_trait]
pub trait ResourceStore: Send {
    async fn get_device(&self, uuid: &str) -> Result<Option<Device>, Error>;

    /// Every persisted device, used by startup's descriptor-processing
    /// sweep and `deviceInitializationTask` enumeration (§4.8).
    async fn get_all_devices(&self) -> Result<Vec<Device>, Error>;

    async fn get_endpoint(
        &self,
        device_uuid: &str,
        endpoint_id: &str,
    ) -> Result<Option<Endpoint>, Error>;

    /// Resolves a resource, applying the endpoint-to-device fallback
    /// contract (§4.1): if `uri` names an endpoint resource and no
    /// match is found there, retry with the same leaf id against the
    /// root device.
    async fn get_resource_by_uri(&self, uri: &Uri) -> Result<Option<Resource>, Error>;

    async fn get_metadata_by_uri(&self, uri: &Uri) -> Result<Option<Metadata>, Error>;

    /// Resources matching `re`, paired with the URI each lives at —
    /// needed so a wildcard write can address each match individually.
    async fn get_resources_by_uri_regex(
        &self,
        re: &regex::Regex,
    ) -> Result<Vec<(Uri, Resource)>, Error>;

    async fn get_metadata_by_uri_regex(
        &self,
        re: &regex::Regex,
    ) -> Result<Vec<(Uri, Metadata)>, Error>;

    async fn get_devices_by_device_class(&self, class: &str) -> Result<Vec<Device>, Error>;

    async fn get_devices_by_profile(&self, profile: &str) -> Result<Vec<Device>, Error>;

    async fn get_devices_by_driver(&self, driver_name: &str) -> Result<Vec<Device>, Error>;

    async fn get_devices_by_metadata(
        &self,
        id: &str,
        value_eq: Option<&str>,
    ) -> Result<Vec<Device>, Error>;

    async fn add_device(&mut self, device: Device) -> Result<(), Error>;

    async fn remove_device_by_id(&mut self, uuid: &str) -> Result<bool, Error>;

    async fn save_endpoint(
        &mut self,
        device_uuid: &str,
        endpoint: Endpoint,
        lazy: bool,
    ) -> Result<(), Error>;

    async fn add_endpoint(&mut self, device_uuid: &str, endpoint: Endpoint) -> Result<(), Error>;

    async fn save_resource(
        &mut self,
        uri: &Uri,
        resource: Resource,
        lazy: bool,
    ) -> Result<(), Error>;

    async fn save_metadata(
        &mut self,
        uri: &Uri,
        metadata: Metadata,
        lazy: bool,
    ) -> Result<(), Error>;

    async fn set_system_property(&mut self, key: &str, value: &str) -> Result<(), Error>;

    async fn get_system_property(&self, key: &str) -> Result<Option<String>, Error>;

    /// Re-reads persisted state from the backing store, discarding any
    /// in-memory state that hasn't been saved.
    async fn reload(&mut self) -> Result<(), Error>;
}
