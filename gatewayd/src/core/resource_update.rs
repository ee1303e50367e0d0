//! Resource Update Pipeline (§4.6): the only path through which a
//! resource's stored value changes, whether driven by an external
//! write request or by a driver reporting an observed change.

use super::now_millis;
use super::Core;
use gw_api::events::{EventKind, Owner as EventOwner};
use gw_api::model::mode::Mode;
use gw_api::model::{CachingPolicy, Metadata, Resource};
use gw_api::uri::{Uri, UriPattern};
use gw_api::{Error, Result};
use tracing::instrument;

impl Core {
    /// `readResourceByUri(uri)`.
    #[instrument(skip(self))]
    pub async fn read_resource_by_uri(&self, uri: &Uri) -> Result<Option<String>> {
        let Some(res) = self.store().await.get_resource_by_uri(uri).await? else {
            return Ok(None);
        };

        if res.caching_policy() == CachingPolicy::Never && res.mode().contains(Mode::READABLE) {
            let device = self
                .store()
                .await
                .get_device(uri.device_uuid())
                .await?
                .ok_or(Error::NotFound)?;

            let Some(driver) = self.registry().get(device.managing_driver_name()) else {
                return Err(Error::DriverFailure(String::from("driver not registered")));
            };

            let value = driver.read_resource(&device, &res).await?;

            self.update_resource(
                uri.device_uuid(),
                uri.endpoint_id(),
                uri.leaf_id().ok_or(Error::InvalidArgument(String::from("uri has no resource id")))?,
                value.clone(),
                None,
            )
            .await?;

            Ok(value)
        } else {
            Ok(res.value().map(String::from))
        }
    }

    /// `writeResourceByUri(uri, value)`.
    #[instrument(skip(self, pattern))]
    pub async fn write_resource_by_uri(&self, pattern: &UriPattern, value: Option<&str>) -> Result<bool> {
        if pattern.contains_wildcard() {
            let re = pattern.to_regex()?;
            let matches = self.store().await.get_resources_by_uri_regex(&re).await?;

            if matches.is_empty() {
                return Ok(false);
            }

            let mut all_ok = true;
            for (uri, _res) in &matches {
                all_ok &= self.write_single_resource(uri, value).await?;
            }
            return Ok(all_ok);
        }

        let uri: Uri = pattern
            .to_string()
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("not a resource uri: {}", pattern)))?;
        self.write_single_resource(&uri, value).await
    }

    async fn write_single_resource(&self, uri: &Uri, value: Option<&str>) -> Result<bool> {
        let Some(res) = self.store().await.get_resource_by_uri(uri).await? else {
            return Ok(false);
        };

        if !res.mode().contains(Mode::WRITEABLE) {
            return Err(Error::UnauthorizedMode(format!("{} is not writeable", uri)));
        }

        let device = self
            .store()
            .await
            .get_device(uri.device_uuid())
            .await?
            .ok_or(Error::NotFound)?;

        let Some(driver) = self.registry().get(device.managing_driver_name()) else {
            return Err(Error::DriverFailure(String::from("driver not registered")));
        };

        Ok(driver.write_resource(&device, &res, res.value(), value).await?)
    }

    /// `executeResourceByUri(uri, arg?) -> (ok, response?)`.
    #[instrument(skip(self))]
    pub async fn execute_resource_by_uri(&self, uri: &Uri, arg: Option<&str>) -> Result<(bool, Option<String>)> {
        let res = self
            .store()
            .await
            .get_resource_by_uri(uri)
            .await?
            .ok_or(Error::NotFound)?;

        if !res.mode().contains(Mode::EXECUTABLE) {
            return Err(Error::UnauthorizedMode(format!("{} is not executable", uri)));
        }

        let device = self
            .store()
            .await
            .get_device(uri.device_uuid())
            .await?
            .ok_or(Error::NotFound)?;

        let Some(driver) = self.registry().get(device.managing_driver_name()) else {
            return Err(Error::DriverFailure(String::from("driver not registered")));
        };

        Ok(driver.execute_resource(&device, &res, arg).await?)
    }

    /// `changeResourceMode(uri, newMode)`: forbids unsetting SENSITIVE,
    /// honored centrally by [`Mode::apply_change`].
    #[instrument(skip(self))]
    pub async fn change_resource_mode(&self, uri: &Uri, requested: Mode) -> Result<()> {
        let mut res = self
            .store()
            .await
            .get_resource_by_uri(uri)
            .await?
            .ok_or(Error::NotFound)?;

        res.change_mode(requested);
        self.store().await.save_resource(uri, res, false).await
    }

    /// `updateResource(deviceUuid, endpointId?, resourceId, newValue, metadata?)`.
    #[instrument(skip(self, metadata))]
    pub async fn update_resource(
        &self,
        device_uuid: &str,
        endpoint_id: Option<&str>,
        resource_id: &str,
        new_value: Option<String>,
        metadata: Option<String>,
    ) -> Result<()> {
        let uri = match endpoint_id {
            Some(ep) => Uri::endpoint_resource(device_uuid, ep, resource_id)?,
            None => Uri::device_resource(device_uuid, resource_id)?,
        };

        let Some(mut res) = self.store().await.get_resource_by_uri(&uri).await? else {
            return Err(Error::NotFound);
        };

        let always_emit = res.caching_policy() == CachingPolicy::Never && res.mode().contains(Mode::EMIT_EVENTS);
        let changed = res.value() != new_value.as_deref();

        if always_emit {
            res.set_value(new_value, now_millis());
            self.store().await.save_resource(&uri, res.clone(), false).await?;
            self.publish_resource_updated(device_uuid, endpoint_id, &res, metadata).await?;
        } else if changed {
            res.set_value(new_value, now_millis());
            self.store().await.save_resource(&uri, res.clone(), false).await?;

            if res.mode().contains(Mode::EMIT_EVENTS) {
                self.publish_resource_updated(device_uuid, endpoint_id, &res, metadata).await?;
            }
        } else {
            res.set_value(new_value, now_millis());
            self.store().await.save_resource(&uri, res, true).await?;
        }

        Ok(())
    }

    async fn publish_resource_updated(
        &self,
        device_uuid: &str,
        endpoint_id: Option<&str>,
        res: &Resource,
        metadata: Option<String>,
    ) -> Result<()> {
        let device = self
            .store()
            .await
            .get_device(device_uuid)
            .await?
            .ok_or(Error::NotFound)?;

        let owner = match endpoint_id {
            Some(ep_id) => {
                let profile = device
                    .endpoint(ep_id)
                    .map(|ep| ep.profile().to_string())
                    .unwrap_or_default();

                EventOwner::Endpoint {
                    device_uuid: device_uuid.to_string(),
                    endpoint_id: ep_id.to_string(),
                    profile,
                }
            }
            None => EventOwner::Device {
                uuid: device_uuid.to_string(),
                device_class: device.device_class().to_string(),
            },
        };

        self.events().publish(EventKind::ResourceUpdated {
            resource: res.into(),
            root_device_id: device_uuid.to_string(),
            root_device_class: device.device_class().to_string(),
            owner,
            metadata,
        })?;
        Ok(())
    }

    /// `setMetadata`/`getMetadata`: read/compare/write, avoiding
    /// redundant writes.
    pub async fn get_metadata(&self, uri: &Uri) -> Result<Option<String>> {
        Ok(self
            .store()
            .await
            .get_metadata_by_uri(uri)
            .await?
            .and_then(|m| m.value().map(String::from)))
    }

    pub async fn set_metadata(&self, uri: &Uri, value: Option<String>) -> Result<()> {
        let current = self.store().await.get_metadata_by_uri(uri).await?;

        if current.as_ref().and_then(|m| m.value()) == value.as_deref() {
            return Ok(());
        }

        let id = uri.leaf_id().ok_or(Error::InvalidArgument(String::from("uri has no metadata id")))?;
        self.store().await.save_metadata(uri, Metadata::new(id, value), false).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{make_core, make_core_with_registry, StubDriver};
    use gw_api::driver::Registry;
    use gw_api::model::{CachingPolicy, Device, Resource, ResourceType};
    use gw_api::uri::{Uri, UriPattern};
    use gw_api::Error;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_resource_by_uri_rejects_non_writeable() {
        let core = make_core();

        let mut device = Device::new("dev-1", "stub-class", 1, "stub", 0);
        device.add_resource(Resource::new(
            "label",
            ResourceType::from("string"),
            gw_api::model::mode::Mode::READABLE,
        ));
        core.store().await.add_device(device).await.unwrap();

        let uri = Uri::device_resource("dev-1", "label").unwrap();
        let pattern = UriPattern::new(&uri.to_string());
        let result = core.write_resource_by_uri(&pattern, Some("new value")).await;

        assert!(matches!(result, Err(Error::UnauthorizedMode(_))));
    }

    #[tokio::test]
    async fn test_read_resource_by_uri_never_cached_calls_driver() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver::new("stub", "stub-class")));
        let core = make_core_with_registry(registry);

        let mut device = Device::new("dev-1", "stub-class", 1, "stub", 0);
        let mut res = Resource::new(
            "label",
            ResourceType::from("string"),
            gw_api::model::mode::Mode::READABLE,
        );
        res.set_caching_policy(CachingPolicy::Never);
        res.set_value(Some("live-value".to_string()), 0);
        device.add_resource(res);
        core.store().await.add_device(device).await.unwrap();

        let uri = Uri::device_resource("dev-1", "label").unwrap();
        let value = core.read_resource_by_uri(&uri).await.unwrap();

        // StubDriver::read_resource echoes the resource's current value.
        assert_eq!(value.as_deref(), Some("live-value"));
    }

    #[tokio::test]
    async fn test_update_resource_emits_event_on_change() {
        let core = make_core();

        let mut device = Device::new("dev-1", "stub-class", 1, "stub", 0);
        device.add_resource(Resource::new(
            "label",
            ResourceType::from("string"),
            gw_api::model::mode::Mode::READABLE | gw_api::model::mode::Mode::EMIT_EVENTS,
        ));
        core.store().await.add_device(device).await.unwrap();

        let mut events = core.events().subscribe();

        core.update_resource("dev-1", None, "label", Some("hello".to_string()), None)
            .await
            .unwrap();

        let evt = events.recv().await.unwrap();
        assert!(matches!(evt.kind, gw_api::events::EventKind::ResourceUpdated { .. }));
    }

    #[tokio::test]
    async fn test_update_resource_skips_event_when_unchanged_and_not_emit_events() {
        let core = make_core();

        let mut device = Device::new("dev-1", "stub-class", 1, "stub", 0);
        let mut res = Resource::new(
            "label",
            ResourceType::from("string"),
            gw_api::model::mode::Mode::READABLE,
        );
        res.set_value(Some("hello".to_string()), 0);
        device.add_resource(res);
        core.store().await.add_device(device).await.unwrap();

        let mut events = core.events().subscribe();

        core.update_resource("dev-1", None, "label", Some("hello".to_string()), None)
            .await
            .unwrap();

        assert!(events.try_recv().is_err());
    }
}
