//! The gateway core: owns the Resource Store, the Driver Registry, the
//! Event Producer, and the mutable state the discovery and monitoring
//! subsystems share (§5 "Global mutable state" → fields of a single
//! `Core` object, per the design note).

pub mod discovery;
pub mod ip_monitor;
pub mod pipeline;
pub mod resource_update;
pub mod startup;
pub mod supervisor;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;
use gw_api::driver::{DeviceDescriptor, Registry};
use gw_api::events::EventProducer;
use gw_api::store::ResourceStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use discovery::Session;
use ip_monitor::IpRecovery;
use startup::Readiness;
use watchdog::{MonitorHandle, Watchdog};

/// Looks up the authorization/parameterization record for a newly
/// discovered device ("device descriptor", see the glossary). Named
/// only by contract: the concrete lookup (HTTP fetch, local cache) is
/// an external collaborator out of scope for this core.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn lookup(
        &self,
        manufacturer: &str,
        model: &str,
        hardware_version: &str,
        firmware_version: &str,
    ) -> Option<DeviceDescriptor>;
}

/// Re-uses a legacy device record for a `deviceFound` call that would
/// otherwise create a fresh one (§4.3 step 4). An external collaborator,
/// same shape as [`DescriptorSource`]: when it hands back a device, the
/// pipeline reuses it in place of a new shell and suppresses the
/// discovery events a brand-new device would publish.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, details: &gw_api::driver::DeviceFoundDetails) -> Option<gw_api::model::Device>;
}

/// Milliseconds since the Unix epoch, used for `dateOfLastSyncMillis`,
/// `dateAdded`, and `dateLastContacted`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct Core {
    store: Mutex<Box<dyn ResourceStore + Send>>,
    registry: Registry,
    events: EventProducer,
    descriptors: Option<Arc<dyn DescriptorSource>>,
    migrator: Option<Arc<dyn Migrator>>,
    active_discoveries: Mutex<HashMap<String, Session>>,
    marked_for_removal: Mutex<HashSet<String>>,
    monitoring_info: Mutex<HashMap<String, MonitorHandle>>,
    watchdog: Watchdog,
    ip_recovery: Option<Arc<dyn IpRecovery>>,
    readiness: Readiness,
    self_weak: Weak<Core>,
}

impl Core {
    /// Builds the core wrapped in its `Arc` from the start
    /// ([`Arc::new_cyclic`]), so methods that only have `&self` (as any
    /// trait object method must) can still recover an `Arc<Core>` where
    /// the pipeline needs one — see [`Core::arc_self`].
    pub fn new(
        store: Box<dyn ResourceStore + Send>,
        registry: Registry,
        descriptors: Option<Arc<dyn DescriptorSource>>,
        ip_recovery: Option<Arc<dyn IpRecovery>>,
        migrator: Option<Arc<dyn Migrator>>,
    ) -> Arc<Core> {
        Arc::new_cyclic(|self_weak| Core {
            store: Mutex::new(store),
            registry,
            events: EventProducer::new(256),
            descriptors,
            migrator,
            active_discoveries: Mutex::new(HashMap::new()),
            marked_for_removal: Mutex::new(HashSet::new()),
            monitoring_info: Mutex::new(HashMap::new()),
            watchdog: Watchdog::new(),
            ip_recovery,
            readiness: Readiness::default(),
            self_weak: self_weak.clone(),
        })
    }

    /// Recovers the `Arc<Core>` wrapping this core from a plain `&self`
    /// receiver. Only panics if called before the core has finished
    /// construction, which can't happen from outside this module.
    pub(crate) fn arc_self(&self) -> Arc<Core> {
        self.self_weak
            .upgrade()
            .expect("Core is always constructed via Arc::new_cyclic")
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventProducer {
        &self.events
    }

    pub async fn store(&self) -> tokio::sync::MutexGuard<'_, Box<dyn ResourceStore + Send>> {
        self.store.lock().await
    }

    pub async fn descriptor_for(
        &self,
        manufacturer: &str,
        model: &str,
        hardware_version: &str,
        firmware_version: &str,
    ) -> Option<DeviceDescriptor> {
        match &self.descriptors {
            Some(src) => {
                src.lookup(manufacturer, model, hardware_version, firmware_version)
                    .await
            }
            None => None,
        }
    }

    pub async fn migrate_for(
        &self,
        details: &gw_api::driver::DeviceFoundDetails,
    ) -> Option<gw_api::model::Device> {
        match &self.migrator {
            Some(m) => m.migrate(details).await,
            None => None,
        }
    }

    /// Reads `deviceDescriptorBypass` (§6 system properties table).
    pub async fn descriptor_bypass(&self) -> bool {
        self.store()
            .await
            .get_system_property("deviceDescriptorBypass")
            .await
            .ok()
            .flatten()
            .as_deref()
            == Some("true")
    }

    pub async fn is_blacklisted(&self, uuid: &str) -> bool {
        self.blacklisted_uuids().await.iter().any(|u| u == uuid)
    }

    pub async fn blacklisted_uuids(&self) -> Vec<String> {
        self.store()
            .await
            .get_system_property("cpe.blacklisted.devices")
            .await
            .ok()
            .flatten()
            .map(|csv| csv.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default()
    }

    /// Marks `uuid` for removal if its discovery is currently in
    /// flight; otherwise removes it directly. Used both by the public
    /// `removeDevice` call and by the blacklist sweep (§4.3 step 11,
    /// property 6/9).
    pub async fn remove_device(&self, uuid: &str, class: &str) -> gw_api::Result<bool> {
        if self.active_discoveries.lock().await.contains_key(class) {
            self.marked_for_removal.lock().await.insert(uuid.to_string());
        }

        let removed = self.store().await.remove_device_by_id(uuid).await?;

        if removed {
            self.stop_ip_monitor(uuid).await;
            self.events.publish(gw_api::events::EventKind::DeviceRemoved {
                uuid: uuid.to_string(),
                class: class.to_string(),
            })?;
        }
        Ok(removed)
    }

    /// Applies `cpe.blacklisted.devices` (property 9 / scenario S3):
    /// removes every listed device that's currently persisted.
    pub async fn apply_blacklist(&self, csv: &str) -> gw_api::Result<()> {
        self.store()
            .await
            .set_system_property("cpe.blacklisted.devices", csv)
            .await?;

        for uuid in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(device) = self.store().await.get_device(uuid).await? {
                self.remove_device(uuid, device.device_class()).await?;
            }
        }
        Ok(())
    }

    /// `updateEndpoint(uuid, endpointId, enabled)` (§4.1 invariant 5,
    /// scenario S2): flips an endpoint's enabled flag. Disabling
    /// publishes `endpoint-removed` and calls the driver's
    /// `endpointDisabled` hook; if that was the device's last enabled
    /// endpoint, the whole device is removed (`device-removed`)
    /// instead of just sitting endpoint-less.
    pub async fn update_endpoint(&self, uuid: &str, endpoint_id: &str, enabled: bool) -> gw_api::Result<()> {
        let mut device = self
            .store()
            .await
            .get_device(uuid)
            .await?
            .ok_or(gw_api::Error::NotFound)?;

        let class = device.device_class().to_string();
        let driver_name = device.managing_driver_name().to_string();

        let Some(ep) = device.endpoint_mut(endpoint_id) else {
            return Err(gw_api::Error::NotFound);
        };
        ep.set_enabled(enabled);
        let updated_ep = ep.clone();

        self.store()
            .await
            .save_endpoint(uuid, updated_ep.clone(), false)
            .await?;

        if enabled {
            return Ok(());
        }

        if let Some(driver) = self.registry().get(&driver_name) {
            driver.endpoint_disabled(&updated_ep).await;
        }

        self.events().publish(gw_api::events::EventKind::EndpointRemoved {
            endpoint: (&updated_ep).into(),
            class: class.clone(),
        })?;

        if !device.endpoints().any(|e| e.enabled()) {
            self.remove_device(uuid, &class).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_core;
    use gw_api::model::Device;

    #[tokio::test]
    async fn test_remove_device_persists_and_publishes() {
        let core = make_core();

        core.store()
            .await
            .add_device(Device::new("dev-1", "light", 1, "stub", 0))
            .await
            .unwrap();

        let mut events = core.events().subscribe();

        assert!(core.remove_device("dev-1", "light").await.unwrap());
        assert!(core.store().await.get_device("dev-1").await.unwrap().is_none());

        let evt = events.recv().await.unwrap();
        assert!(matches!(evt.kind, gw_api::events::EventKind::DeviceRemoved { .. }));
    }

    #[tokio::test]
    async fn test_remove_device_missing_is_noop() {
        let core = make_core();

        assert!(!core.remove_device("missing", "light").await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_blacklist_removes_listed_devices() {
        let core = make_core();

        core.store()
            .await
            .add_device(Device::new("dev-1", "light", 1, "stub", 0))
            .await
            .unwrap();
        core.store()
            .await
            .add_device(Device::new("dev-2", "light", 1, "stub", 0))
            .await
            .unwrap();

        core.apply_blacklist("dev-1").await.unwrap();

        assert!(core.store().await.get_device("dev-1").await.unwrap().is_none());
        assert!(core.store().await.get_device("dev-2").await.unwrap().is_some());
        assert!(core.is_blacklisted("dev-1").await);
        assert!(!core.is_blacklisted("dev-2").await);
    }

    fn two_endpoint_device() -> Device {
        use gw_api::model::Endpoint;

        let mut device = Device::new("dev-1", "switch", 1, "stub", 0);
        device.add_endpoint(Endpoint::new("1", "onoff", 1));
        device.add_endpoint(Endpoint::new("2", "onoff", 1));
        device
    }

    #[tokio::test]
    async fn test_update_endpoint_disable_leaves_device_intact_with_other_endpoint_enabled() {
        let core = make_core();
        core.store().await.add_device(two_endpoint_device()).await.unwrap();

        let mut events = core.events().subscribe();

        core.update_endpoint("dev-1", "1", false).await.unwrap();

        let device = core.store().await.get_device("dev-1").await.unwrap().unwrap();
        assert!(!device.endpoint("1").unwrap().enabled());
        assert!(device.endpoint("2").unwrap().enabled());

        let evt = events.recv().await.unwrap();
        assert!(matches!(evt.kind, gw_api::events::EventKind::EndpointRemoved { .. }));
        assert!(events.try_recv().is_err(), "device must not be removed while another endpoint is enabled");
    }

    #[tokio::test]
    async fn test_update_endpoint_disabling_last_endpoint_removes_device() {
        let core = make_core();
        core.store().await.add_device(two_endpoint_device()).await.unwrap();

        core.update_endpoint("dev-1", "1", false).await.unwrap();
        core.update_endpoint("dev-1", "2", false).await.unwrap();

        assert!(core.store().await.get_device("dev-1").await.unwrap().is_none());
    }
}
