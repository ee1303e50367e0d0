//! Startup & Readiness (§4.8): the two-precondition readiness gate,
//! the debounced descriptor-processing task, the bounded device-
//! initialization pool, and the capped shutdown sequence.

use super::pipeline::add_common_resources;
use super::{now_millis, Core};
use gw_api::driver::ValueBag;
use gw_api::events::EventKind;
use gw_api::model::Device;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument, warn};

const DESCRIPTOR_PROCESSING_DELAY: Duration = Duration::from_secs(30);
const INIT_POOL_WORKERS: usize = 5;
const INIT_QUEUE_CAPACITY: usize = 128;
const SHUTDOWN_CAP: Duration = Duration::from_secs(31 * 60);

/// Tracks the two readiness preconditions (§4.8) and ensures
/// `ready-for-devices` publishes exactly once.
#[derive(Default)]
pub struct Readiness {
    subsystems_ready: AtomicBool,
    descriptor_collaborator_ready: AtomicBool,
    published: AtomicBool,
    descriptor_task_generation: AtomicU64,
}

impl Core {
    /// Called once per subsystem as it finishes its own startup.
    pub async fn subsystem_ready(self: &Arc<Core>) {
        self.readiness.subsystems_ready.store(true, Ordering::SeqCst);
        self.maybe_become_ready().await;
    }

    /// Called when the device-descriptor collaborator asserts it's
    /// ready (and again, harmlessly, any time its list changes — see
    /// `reschedule_descriptor_processing`).
    pub async fn descriptor_collaborator_ready(self: &Arc<Core>) {
        self.readiness
            .descriptor_collaborator_ready
            .store(true, Ordering::SeqCst);
        self.maybe_become_ready().await;
    }

    async fn maybe_become_ready(self: &Arc<Core>) {
        let ready = self.readiness.subsystems_ready.load(Ordering::SeqCst)
            && self
                .readiness
                .descriptor_collaborator_ready
                .load(Ordering::SeqCst);

        if !ready {
            return;
        }

        if self
            .readiness
            .published
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!("core is ready for devices");
        let _ = self.events().publish(EventKind::ReadyForDevices);

        self.schedule_descriptor_processing();
        self.spawn_device_initialization_pool();
    }

    /// Schedules (or reschedules, coalescing with any pending run) the
    /// descriptor-processing task. Only the generation that survives
    /// the 30-second delay unchanged actually runs.
    pub fn schedule_descriptor_processing(self: &Arc<Core>) {
        let generation = self
            .readiness
            .descriptor_task_generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let core = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(DESCRIPTOR_PROCESSING_DELAY).await;

            if core
                .readiness
                .descriptor_task_generation
                .load(Ordering::SeqCst)
                != generation
            {
                return;
            }

            core.run_descriptor_processing().await;
        });
    }

    #[instrument(skip(self))]
    async fn run_descriptor_processing(&self) {
        let devices = match self.store().await.get_all_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "failed to list devices for descriptor processing");
                return;
            }
        };

        for device in devices {
            let Some(driver) = self.registry().get(device.managing_driver_name()) else {
                continue;
            };

            let descriptor = self
                .descriptor_for(
                    device.metadata("manufacturer").and_then(|m| m.value()).unwrap_or(""),
                    device.metadata("model").and_then(|m| m.value()).unwrap_or(""),
                    device.metadata("hardwareVersion").and_then(|m| m.value()).unwrap_or(""),
                    device.metadata("firmwareVersion").and_then(|m| m.value()).unwrap_or(""),
                )
                .await;

            if let Some(descriptor) = descriptor {
                let mut device = device;
                if let Err(e) = driver.process_device_descriptor(&mut device, &descriptor).await {
                    warn!(uuid = device.uuid(), error = %e, "processDeviceDescriptor failed");
                }
            }
        }
    }

    /// Spawns the bounded `deviceInitializationTask` pool and enqueues
    /// every persisted device once subsystems are ready.
    fn spawn_device_initialization_pool(self: &Arc<Core>) {
        let (tx, rx) = mpsc::channel::<Device>(INIT_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..INIT_POOL_WORKERS {
            let core = self.clone();
            let rx = rx.clone();

            tokio::spawn(async move {
                loop {
                    let device = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };

                    match device {
                        Some(device) => core.device_initialization_task(device).await,
                        None => break,
                    }
                }
            });
        }

        let core = self.clone();
        tokio::spawn(async move {
            let devices = match core.store().await.get_all_devices().await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!(error = %e, "failed to list devices for initialization");
                    return;
                }
            };

            for device in devices {
                if tx.send(device).await.is_err() {
                    break;
                }
            }
        });
    }

    #[instrument(skip(self, device), fields(uuid = %device.uuid()))]
    async fn device_initialization_task(self: &Arc<Core>, device: Device) {
        let Some(driver) = self.registry().get(device.managing_driver_name()) else {
            return;
        };

        let needs_reconfiguring = driver.device_needs_reconfiguring(&device).await;
        let class_version = driver.get_device_class_version(device.device_class());

        if needs_reconfiguring && class_version.is_some() {
            match self.reconfigure_device(&device, &driver, class_version.unwrap()).await {
                Ok(new_device) => self.start_ip_monitor_if_applicable(&new_device).await,
                Err(e) => warn!(error = %e, "reconfiguration failed, leaving existing device in place"),
            }
        } else {
            let mut synced = device.clone();
            match driver.synchronize_device(&mut synced).await {
                Ok(()) => {
                    if let Err(e) = self.store().await.remove_device_by_id(synced.uuid()).await {
                        warn!(error = %e, "failed to replace device after synchronize");
                    } else if let Err(e) = self.store().await.add_device(synced.clone()).await {
                        warn!(error = %e, "failed to persist synchronized device");
                    } else {
                        self.start_ip_monitor_if_applicable(&synced).await;
                    }
                }
                Err(e) => warn!(error = %e, "synchronizeDevice failed"),
            }
        }
    }

    /// Reconfiguration (§4.8): builds a new device instance through
    /// configure → fetch → addCommonResources → register, then
    /// "yoinks" the old instance's metadata, `dateAdded`, and endpoint
    /// labels into it before swapping the two in the store.
    async fn reconfigure_device(
        &self,
        old: &Device,
        driver: &Arc<dyn gw_api::driver::Driver>,
        new_class_version: u32,
    ) -> gw_api::Result<Device> {
        let mut new_device = Device::new(
            old.uuid(),
            old.device_class(),
            new_class_version,
            driver.driver_name(),
            old.date_added_millis(),
        );

        driver.configure_device(&mut new_device, None).await?;

        let mut bag = ValueBag::new();
        driver.fetch_initial_resource_values(&new_device, &mut bag).await?;
        add_common_resources(&mut new_device, &bag);
        driver.register_resources(&mut new_device, &bag).await?;

        // Yoink: carry over everything the rediscovery pass can't
        // reconstruct from the hardware itself.
        for m in old.metadata_entries() {
            new_device.set_metadata(m.clone());
        }
        if let Some(date_added) = old.resource("dateAdded") {
            if let Some(res) = new_device.resource_mut("dateAdded") {
                res.set_value(date_added.value().map(String::from), now_millis());
            }
        }
        for old_ep in old.endpoints() {
            if let Some(label) = old_ep.resource("label") {
                if let Some(new_ep) = new_device.endpoint_mut(old_ep.id()) {
                    if let Some(res) = new_ep.resource_mut("label") {
                        res.set_value(label.value().map(String::from), now_millis());
                    }
                }
            }
        }

        self.store().await.remove_device_by_id(old.uuid()).await?;
        self.store().await.add_device(new_device.clone()).await?;
        Ok(new_device)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::make_core;
    use async_trait::async_trait;
    use gw_api::driver::{DeviceDescriptor, Driver, ValueBag};
    use gw_api::model::mode::Mode;
    use gw_api::model::{Device, Endpoint, Metadata, Resource, ResourceType};
    use gw_api::types::Error;
    use std::sync::Arc;

    /// A rediscovery driver shaped like a real endpoint-bearing driver
    /// (e.g. gw-drv-hue): it rebuilds the endpoint and its `label`
    /// resource from scratch, with no knowledge of the user-assigned
    /// label or the device's original `dateAdded` — exactly what the
    /// yoink step is responsible for restoring.
    struct ReconfigDriver;

    #[async_trait]
    impl Driver for ReconfigDriver {
        fn driver_name(&self) -> &str {
            "stub"
        }

        fn supported_device_classes(&self) -> &[String] {
            &[]
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
            let mut ep = Endpoint::new("ep1", "onoff", 1);
            ep.add_resource(Resource::new(
                "label",
                ResourceType::from("string"),
                Mode::READABLE | Mode::WRITEABLE,
            ));
            device.add_endpoint(ep);
            Ok(())
        }

        async fn fetch_initial_resource_values(
            &self,
            _device: &Device,
            bag: &mut ValueBag,
        ) -> Result<(), Error> {
            bag.set("dateAdded", Some("0".to_string()));
            Ok(())
        }

        async fn register_resources(&self, _device: &mut Device, _bag: &ValueBag) -> Result<(), Error> {
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

        async fn device_removed(&self, _device: &Device) {}
    }

    #[tokio::test]
    async fn test_reconfigure_device_preserves_date_added_metadata_and_endpoint_labels() {
        let core = make_core();

        let mut old = Device::new("dev-1", "switch", 1, "stub", 555);
        old.set_metadata(Metadata::new("manufacturer", Some("Acme".to_string())));

        let mut date_added = Resource::new("dateAdded", ResourceType::from("integer"), Mode::READABLE);
        date_added.set_value(Some("555".to_string()), 0);
        old.add_resource(date_added);

        let mut old_ep = Endpoint::new("ep1", "onoff", 1);
        let mut label = Resource::new(
            "label",
            ResourceType::from("string"),
            Mode::READABLE | Mode::WRITEABLE,
        );
        label.set_value(Some("Kitchen Light".to_string()), 0);
        old_ep.add_resource(label);
        old.add_endpoint(old_ep);

        core.store().await.add_device(old.clone()).await.unwrap();

        let driver: Arc<dyn Driver> = Arc::new(ReconfigDriver);
        let new_device = core.reconfigure_device(&old, &driver, 2).await.unwrap();

        assert_eq!(
            new_device.metadata("manufacturer").and_then(|m| m.value()),
            Some("Acme")
        );
        assert_eq!(new_device.resource("dateAdded").and_then(|r| r.value()), Some("555"));
        assert_eq!(
            new_device
                .endpoint("ep1")
                .and_then(|ep| ep.resource("label"))
                .and_then(|r| r.value()),
            Some("Kitchen Light")
        );
    }
}

/// Runs a driver's shutdown, capping the wait at [`SHUTDOWN_CAP`] (an
/// allowance for in-progress firmware upgrades); if the cap expires,
/// logs and returns so the core can continue exiting.
pub async fn shutdown_driver_with_cap(name: &str, driver: Arc<dyn gw_api::driver::Driver>) {
    match tokio::time::timeout(SHUTDOWN_CAP, driver.shutdown()).await {
        Ok(Ok(())) => info!(driver = name, "driver shut down cleanly"),
        Ok(Err(e)) => error!(driver = name, error = %e, "driver shutdown reported an error"),
        Err(_) => warn!(driver = name, "driver shutdown exceeded the cap, continuing exit"),
    }
}
