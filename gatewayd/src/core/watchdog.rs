//! Monitoring / Communication Watchdog (§4.5): tracks per-device
//! last-contact time and fires comm-fail/comm-restore callbacks, plus
//! the per-device IP-monitoring tasks used by IP-addressable drivers.

use super::{now_millis, Core};
use gw_api::driver::Driver;
use gw_api::uri::Uri;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

/// What the core remembers about a device's monitoring task: whether
/// it's still running and a handle to join on stop.
pub struct MonitorHandle {
    pub running: Arc<std::sync::atomic::AtomicBool>,
    pub task: JoinHandle<()>,
}

struct LastContact {
    millis: u64,
    driver_name: String,
    device_class: String,
}

/// Per-device last-contact bookkeeping. Kept separate from
/// `Core::monitoring_info` (which tracks IP-monitor task handles)
/// since every device is watched here, not just IP-addressable ones.
#[derive(Default)]
pub struct Watchdog {
    last_contact: std::sync::Mutex<HashMap<String, LastContact>>,
}

impl Watchdog {
    pub fn new() -> Watchdog {
        Watchdog::default()
    }

    /// Called whenever a resource sync for `uuid` succeeds, to refresh
    /// the in-memory clock used to detect silence. Does not itself
    /// write the `dateLastContacted` resource — see
    /// [`Core::update_date_last_contacted`].
    pub fn touch(&self, uuid: &str, driver_name: &str, device_class: &str) {
        let mut guard = self.last_contact.lock().unwrap_or_else(|p| p.into_inner());

        guard.insert(
            uuid.to_string(),
            LastContact {
                millis: now_millis(),
                driver_name: driver_name.to_string(),
                device_class: device_class.to_string(),
            },
        );
    }

    pub fn last_contact_millis(&self, uuid: &str) -> Option<u64> {
        self.last_contact
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(uuid)
            .map(|lc| lc.millis)
    }
}

impl Core {
    /// `onCommFail(uuid)`: looks up the device and driver, tells the
    /// driver communication was lost, and — if the driver belongs to a
    /// shared subsystem (e.g. ZigBee) — notifies the subsystem once.
    #[instrument(skip(self))]
    pub async fn on_comm_fail(&self, uuid: &str) {
        let device = match self.store().await.get_device(uuid).await {
            Ok(Some(d)) => d,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to look up device for comm-fail");
                return;
            }
        };

        let Some(driver) = self.registry().get(device.managing_driver_name()) else {
            return;
        };

        driver.communication_failed(&device).await;

        if let Some(subsystem) = driver.subsystem_name() {
            notify_subsystem_comm_fail(self.registry(), subsystem, &driver);
        }
    }

    /// `onCommRestore(uuid)`: tells the driver communication is back,
    /// then refreshes the watchdog clock.
    #[instrument(skip(self))]
    pub async fn on_comm_restore(&self, uuid: &str) {
        let device = match self.store().await.get_device(uuid).await {
            Ok(Some(d)) => d,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to look up device for comm-restore");
                return;
            }
        };

        if let Some(driver) = self.registry().get(device.managing_driver_name()) {
            driver.communication_restored(&device).await;
            self.watchdog.touch(uuid, driver.driver_name(), device.device_class());
            self.update_date_last_contacted(uuid).await;
        }
    }

    /// `updateDeviceDateLastContacted`: writes the `dateLastContacted`
    /// resource with `LAZY_SAVE_NEXT` semantics. Called on every
    /// successful resource sync (§4.5), currently only from
    /// [`Core::on_comm_restore`].
    async fn update_date_last_contacted(&self, uuid: &str) {
        let Ok(uri) = Uri::device_resource(uuid, "dateLastContacted") else {
            return;
        };

        let Ok(Some(mut res)) = self.store().await.get_resource_by_uri(&uri).await else {
            return;
        };

        res.set_value(Some(now_millis().to_string()), now_millis());
        if let Err(e) = self.store().await.save_resource(&uri, res, true).await {
            warn!(error = %e, "failed to write dateLastContacted");
        }
    }
}

/// Best-effort notification to every other driver sharing `subsystem`.
/// A single ZigBee radio backs several drivers; a comm failure on one
/// usually means the radio itself needs attention.
fn notify_subsystem_comm_fail(registry: &gw_api::driver::Registry, subsystem: &str, origin: &Arc<dyn Driver>) {
    for name in registry.driver_names() {
        if let Some(driver) = registry.get(name) {
            if driver.subsystem_name() == Some(subsystem) && !Arc::ptr_eq(&driver, origin) {
                driver.subsystem_comm_failed(subsystem);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{make_core_with_registry, StubDriver};
    use gw_api::driver::Registry;
    use gw_api::model::Device;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_on_comm_restore_touches_watchdog_clock() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver::new("stub", "stub-class")));
        let core = make_core_with_registry(registry);

        core.store()
            .await
            .add_device(Device::new("dev-1", "stub-class", 1, "stub", 0))
            .await
            .unwrap();

        assert!(core.watchdog.last_contact_millis("dev-1").is_none());
        core.on_comm_restore("dev-1").await;
        assert!(core.watchdog.last_contact_millis("dev-1").is_some());
    }

    #[tokio::test]
    async fn test_on_comm_fail_notifies_sibling_in_same_subsystem() {
        let radio_a = Arc::new(StubDriver::with_subsystem("radio-a", "class-a", "zigbee-radio"));
        let radio_b = Arc::new(StubDriver::with_subsystem("radio-b", "class-b", "zigbee-radio"));

        let mut registry = Registry::new();
        registry.register(radio_a.clone());
        registry.register(radio_b.clone());
        let core = make_core_with_registry(registry);

        core.store()
            .await
            .add_device(Device::new("dev-1", "class-a", 1, "radio-a", 0))
            .await
            .unwrap();

        core.on_comm_fail("dev-1").await;

        assert!(radio_b.subsystem_comm_failed_calls.load(Ordering::SeqCst));
        assert!(radio_a.comm_failed_calls.load(Ordering::SeqCst));
        assert!(!radio_a.subsystem_comm_failed_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_on_comm_fail_unknown_device_is_noop() {
        let core = make_core_with_registry(Registry::new());
        core.on_comm_fail("missing").await;
    }
}
