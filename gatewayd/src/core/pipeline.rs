//! The Device-Found Pipeline (§4.3): the critical state machine a
//! driver drives by calling [`Core::device_found`] once it has
//! identified a new or recovered device.

use super::{now_millis, Core};
use async_trait::async_trait;
use gw_api::driver::{DeviceFoundDetails, DeviceSink, Driver, Name, ValueBag};
use gw_api::events::EventKind;
use gw_api::model::mode::Mode;
use gw_api::model::{Device, Endpoint, Resource, ResourceType};
use gw_api::uri::Uri;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Forwards a driver's `device_found` call to the core's registry to
/// recover the `Arc<dyn Driver>` the pipeline needs, then runs the
/// pipeline itself.
#[async_trait]
impl DeviceSink for Core {
    async fn device_found(
        &self,
        details: DeviceFoundDetails,
        driver_name: Name,
        never_reject: bool,
    ) -> bool {
        let Some(driver) = self.registry().get(&driver_name) else {
            warn!(driver = %driver_name, "device_found from an unregistered driver");
            return false;
        };

        Core::device_found(self.arc_self(), details, driver, never_reject).await
    }
}

impl Core {
    /// `deviceFound(details, neverReject)`. Returns `false` at any
    /// rejection point; the driver is expected to interpret `false` as
    /// "discard your local bookkeeping for this device" (`neverReject`
    /// only widens step 2's descriptor check, it never suppresses the
    /// blacklist gate).
    #[instrument(skip(self, driver), fields(uuid = %details.uuid, class = %details.device_class))]
    pub async fn device_found(
        self: &Arc<Core>,
        details: DeviceFoundDetails,
        driver: Arc<dyn Driver>,
        never_reject: bool,
    ) -> bool {
        let uuid = details.uuid.clone();
        let class = details.device_class.clone();

        // Step 1: blacklist gate.
        if self.is_blacklisted(&uuid).await {
            let _ = self.events().publish(EventKind::DeviceRejected {
                early_details: format!("{} ({})", uuid, class),
            });
            return false;
        }

        // Step 2: descriptor lookup, plus the migrator — its presence
        // also widens the rejection gate below.
        let descriptor = self
            .descriptor_for(
                &details.manufacturer,
                &details.model,
                &details.hardware_version,
                &details.firmware_version,
            )
            .await;
        let migrated = self.migrate_for(&details).await;
        let is_migrating = migrated.is_some();

        if descriptor.is_none() && !is_migrating && !never_reject && !self.descriptor_bypass().await {
            let _ = self.events().publish(EventKind::DeviceRejected {
                early_details: format!("{} ({})", uuid, class),
            });
            return false;
        }

        // Step 3: create device shell, populate metadata from the
        // descriptor — unless the migrator handed back a legacy device
        // to reuse instead.
        let mut device = match migrated {
            Some(d) => d,
            None => {
                let mut shell = Device::new(
                    uuid.clone(),
                    class.clone(),
                    details.device_class_version,
                    driver.driver_name().to_string(),
                    now_millis(),
                );

                if let Some(d) = &descriptor {
                    shell.set_metadata(gw_api::model::Metadata::new("manufacturer", Some(d.manufacturer.clone())));
                    shell.set_metadata(gw_api::model::Metadata::new("model", Some(d.model.clone())));
                }

                shell
            }
        };

        // Step 4: route through the driver or the migrator. The
        // migrator path suppresses the discovery events a brand-new
        // device would publish.
        if !is_migrating {
            let _ = self.events().publish(EventKind::DeviceDiscovered {
                early_details: format!("{} ({})", uuid, class),
            });
            let _ = self.events().publish(EventKind::DeviceConfigureStarted {
                class: class.clone(),
                uuid: uuid.clone(),
            });
        }

        // Step 5: configureDevice.
        if let Err(e) = driver.configure_device(&mut device, descriptor.as_ref()).await {
            warn!(error = %e, "configureDevice failed");
            let _ = self.events().publish(EventKind::DeviceConfigureFailed {
                class: class.clone(),
                uuid: uuid.clone(),
            });
            driver.device_removed(&device).await;
            let _ = self.events().publish(EventKind::DeviceDiscoveryFailed {
                uuid: uuid.clone(),
                class: class.clone(),
            });
            return false;
        }
        let _ = self.events().publish(EventKind::DeviceConfigureCompleted {
            class: class.clone(),
            uuid: uuid.clone(),
        });

        // Step 6: common initial values.
        let mut bag = ValueBag::new();
        bag.set("manufacturer", Some(details.manufacturer.clone()));
        bag.set("model", Some(details.model.clone()));
        bag.set("hardwareVersion", Some(details.hardware_version.clone()));
        bag.set("firmwareVersion", Some(details.firmware_version.clone()));
        bag.set("firmwareUpdateStatus", None);
        let now = now_millis();
        bag.set("dateAdded", Some(now.to_string()));
        bag.set("dateLastContacted", Some(now.to_string()));
        bag.set("commFail", Some("false".to_string()));

        // Step 7: fetchInitialResourceValues.
        if let Err(e) = driver.fetch_initial_resource_values(&device, &mut bag).await {
            warn!(error = %e, "fetchInitialResourceValues failed");
            driver.device_removed(&device).await;
            let _ = self.events().publish(EventKind::DeviceDiscoveryFailed {
                uuid: uuid.clone(),
                class: class.clone(),
            });
            return false;
        }

        // Step 8: addCommonResources, if-available.
        add_common_resources(&mut device, &bag);

        // Step 9: registerResources (driver-specific).
        if let Err(e) = driver.register_resources(&mut device, &bag).await {
            warn!(error = %e, "registerResources failed");
            driver.device_removed(&device).await;
            let _ = self.events().publish(EventKind::DeviceDiscoveryFailed {
                uuid: uuid.clone(),
                class: class.clone(),
            });
            return false;
        }

        // Step 10: processDeviceDescriptor (optional).
        if let Some(d) = &descriptor {
            if let Err(e) = driver.process_device_descriptor(&mut device, d).await {
                warn!(error = %e, "processDeviceDescriptor failed");
            }
        }

        // Step 11: re-check mark-for-removal.
        if self.marked_for_removal.lock().await.remove(&uuid) {
            driver.device_removed(&device).await;
            let _ = self.events().publish(EventKind::DeviceDiscoveryFailed {
                uuid: uuid.clone(),
                class: class.clone(),
            });
            return false;
        }

        // Step 12: finalize.
        finalize_device(self, &mut device, details.recovery_mode).await;
        self.start_ip_monitor_if_applicable(&device).await;

        // Step 13: post-finalize notifications (non-migrator).
        if !is_migrating {
            let _ = self.events().publish(EventKind::DeviceDiscoveryCompleted {
                device: (&device).into(),
            });
        }
        driver.device_persisted(&device).await;

        info!("device-found pipeline completed");
        true
    }
}

/// Creates the §6 common resources from the bag, only where the bag
/// actually has a value for them; the reset-to-factory executable is
/// always created. Shared with [`super::startup`]'s reconfiguration
/// path, which runs the same configure/fetch/register sequence for an
/// existing device.
pub(super) fn add_common_resources(device: &mut Device, bag: &ValueBag) {
    const COMMON: &[(&str, &str, Mode)] = &[
        ("manufacturer", "string", Mode::READABLE),
        ("model", "string", Mode::READABLE),
        ("hardwareVersion", "string", Mode::READABLE),
        ("firmwareVersion", "string", Mode::READABLE),
        ("firmwareUpdateStatus", "string", Mode::READABLE),
        ("dateAdded", "integer", Mode::READABLE),
        ("dateLastContacted", "integer", Mode::READABLE),
        ("commFail", "bool", Mode::READABLE),
    ];

    for (id, kind, mode) in COMMON {
        if !bag.contains(id) {
            continue;
        }

        let mut res = Resource::new(*id, ResourceType::from(*kind), *mode);
        res.set_value(bag.get(id).flatten().map(String::from), now_millis());
        device.add_resource(res);
    }

    let mut reset = Resource::new(
        "resetToFactory",
        ResourceType::from("executable"),
        Mode::EXECUTABLE,
    );
    reset.set_value(None, now_millis());
    device.add_resource(reset);
}

async fn finalize_device(core: &Arc<Core>, device: &mut Device, recovery_mode: bool) {
    if let Some(tz) = core.store().await.get_system_property("posix.timezone").await.ok().flatten() {
        if device.resource("timezone").is_some() {
            if let Some(res) = device.resource_mut("timezone") {
                res.set_value(Some(tz), now_millis());
            }
        }
    }

    let uuid = device.uuid().to_string();
    let class = device.device_class().to_string();

    if !recovery_mode {
        if let Err(e) = core.store().await.add_device(device.clone()).await {
            warn!(error = %e, "failed to persist discovered device");
            return;
        }

        let uri = Uri::device(&uuid).expect("uuid already validated by Device::new");
        let _ = core.events().publish(EventKind::DeviceAdded {
            uuid: uuid.clone(),
            uri: uri.to_string(),
            class: class.clone(),
        });

        for ep in device.endpoints().filter(|ep| ep.enabled()) {
            let _ = core.events().publish(EventKind::EndpointAdded {
                endpoint: ep.into(),
                class: class.clone(),
            });
        }
    } else {
        let uri = Uri::device(&uuid).expect("uuid already validated by Device::new");
        let _ = core.events().publish(EventKind::DeviceRecovered {
            uuid,
            class,
            uri: uri.to_string(),
        });
    }

    // Config-backup request is LAZY_SAVE_NEXT-exempt: finalize always
    // asks for a flush. The resource store's `add_device`/`save_*`
    // calls already honor the `lazy` flag per-call; no separate
    // backup collaborator exists in this deployment, so there is
    // nothing further to request here.
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{
        make_core, make_core_with_migrator, make_core_with_registry, StubDriver, StubMigrator,
    };
    use gw_api::driver::{DeviceFoundDetails, DeviceSink, Registry};
    use gw_api::events::EventKind;
    use gw_api::model::Device;
    use std::sync::Arc;

    fn details(uuid: &str) -> DeviceFoundDetails {
        DeviceFoundDetails {
            uuid: uuid.to_string(),
            device_class: "stub-class".to_string(),
            device_class_version: 1,
            manufacturer: "Acme".to_string(),
            model: "Widget".to_string(),
            hardware_version: "1".to_string(),
            firmware_version: "1".to_string(),
            recovery_mode: false,
        }
    }

    #[tokio::test]
    async fn test_device_found_happy_path_persists_and_publishes() {
        let core = make_core();
        let driver: Arc<dyn gw_api::driver::Driver> = Arc::new(StubDriver::new("stub", "stub-class"));

        let mut events = core.events().subscribe();

        let accepted = super::Core::device_found(&core, details("dev-1"), driver, false).await;
        assert!(accepted);

        let device = core.store().await.get_device("dev-1").await.unwrap();
        assert!(device.is_some());
        assert_eq!(
            device.unwrap().resource("label").and_then(|r| r.value()),
            Some("stub")
        );

        let mut saw_completed = false;
        while let Ok(evt) = events.try_recv() {
            if matches!(evt.kind, EventKind::DeviceDiscoveryCompleted { .. }) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn test_device_found_rejects_blacklisted_device() {
        let core = make_core();
        core.apply_blacklist("dev-1").await.unwrap();

        let driver: Arc<dyn gw_api::driver::Driver> = Arc::new(StubDriver::new("stub", "stub-class"));
        let accepted = super::Core::device_found(&core, details("dev-1"), driver, false).await;

        assert!(!accepted);
        assert!(core.store().await.get_device("dev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_found_rejects_on_configure_failure() {
        let core = make_core();
        let stub = StubDriver::new("stub", "stub-class");
        stub.fail_configure.store(true, std::sync::atomic::Ordering::SeqCst);
        let driver: Arc<dyn gw_api::driver::Driver> = Arc::new(stub);

        let accepted = super::Core::device_found(&core, details("dev-1"), driver, false).await;

        assert!(!accepted);
        assert!(core.store().await.get_device("dev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_sink_looks_up_driver_by_registered_name() {
        let mut registry = Registry::new();
        let driver: Arc<dyn gw_api::driver::Driver> = Arc::new(StubDriver::new("stub", "stub-class"));
        registry.register(driver);
        let core = make_core_with_registry(registry);

        let accepted = DeviceSink::device_found(&*core, details("dev-1"), Arc::from("stub"), false).await;
        assert!(accepted);
    }

    #[tokio::test]
    async fn test_device_sink_rejects_unregistered_driver_name() {
        let core = make_core();

        let accepted = DeviceSink::device_found(&*core, details("dev-1"), Arc::from("ghost"), false).await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_device_found_migrator_path_suppresses_discovery_events() {
        let legacy = Device::new("dev-1", "stub-class", 1, "stub", 0);
        let migrator = Arc::new(StubMigrator { device: legacy });
        let core = make_core_with_migrator(Registry::new(), migrator);
        let driver: Arc<dyn gw_api::driver::Driver> = Arc::new(StubDriver::new("stub", "stub-class"));

        let mut events = core.events().subscribe();

        // No descriptor collaborator is installed, so without the
        // migrator this would hit step 2's rejection gate.
        let accepted = super::Core::device_found(&core, details("dev-1"), driver, false).await;
        assert!(accepted);
        assert!(core.store().await.get_device("dev-1").await.unwrap().is_some());

        let mut saw_discovered = false;
        let mut saw_completed = false;
        while let Ok(evt) = events.try_recv() {
            match evt.kind {
                EventKind::DeviceDiscovered { .. } => saw_discovered = true,
                EventKind::DeviceDiscoveryCompleted { .. } => saw_completed = true,
                _ => {}
            }
        }
        assert!(!saw_discovered, "migrator path must not publish device-discovered");
        assert!(!saw_completed, "migrator path must not publish device-discovery-completed");
    }

    #[tokio::test]
    async fn test_device_found_honors_mark_for_removal_mid_pipeline() {
        let core = make_core();
        let stub = Arc::new(StubDriver::new("stub", "stub-class"));
        let driver: Arc<dyn gw_api::driver::Driver> = stub.clone();

        // Simulate a removeDevice(uuid) call that arrived while steps
        // 5-10 were running (property 6): the mark is already present
        // by the time the pipeline reaches step 11's re-check.
        core.marked_for_removal.lock().await.insert("dev-1".to_string());

        let mut events = core.events().subscribe();
        let accepted = super::Core::device_found(&core, details("dev-1"), driver, false).await;

        assert!(!accepted);
        assert!(core.store().await.get_device("dev-1").await.unwrap().is_none());
        assert!(stub.device_removed_called.load(std::sync::atomic::Ordering::SeqCst));

        let mut saw_added = false;
        let mut saw_completed = false;
        while let Ok(evt) = events.try_recv() {
            match evt.kind {
                EventKind::DeviceAdded { .. } => saw_added = true,
                EventKind::DeviceDiscoveryCompleted { .. } => saw_completed = true,
                _ => {}
            }
        }
        assert!(!saw_added, "a device marked for removal mid-pipeline must never be added");
        assert!(!saw_completed);
    }
}
