//! Per-device IP monitoring for IP-addressable drivers (thermostats,
//! light bridges): polls device state every ~5 seconds, and on
//! repeated poll failure asks an SSDP-like collaborator to recover the
//! device's current IP address from its MAC (§4.5).

use super::watchdog::MonitorHandle;
use super::Core;
use gw_api::model::value::MacAddress;
use gw_api::model::Device;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of consecutive failed polls before the core treats the
/// device as unreachable and attempts IP recovery. §4.5/S5 require
/// this to fire after the first failed poll.
const FAILURES_BEFORE_RECOVERY: u32 = 1;

/// Looks up the current IP address of a MAC address, the way an
/// SSDP/mDNS discovery pass would. A thin injectable collaborator —
/// the concrete lookup mechanism is out of scope for the core.
#[async_trait::async_trait]
pub trait IpRecovery: Send + Sync {
    async fn recover(&self, mac: &MacAddress) -> Option<String>;
}

impl Core {
    /// Starts (or replaces) the IP-monitor task for `uuid`. `mac` is
    /// used only if the poll starts failing; `initial_ip` seeds the
    /// diff so the first successful poll after this call doesn't fire
    /// a spurious state-changed callback.
    pub async fn start_ip_monitor(self: &Arc<Core>, uuid: String, mac: MacAddress) {
        let running = Arc::new(AtomicBool::new(true));
        let core = self.clone();
        let flag = running.clone();
        let uuid_for_task = uuid.clone();

        let task = tokio::spawn(async move {
            run_ip_monitor(core, uuid_for_task, mac, flag).await;
        });

        self.monitoring_info
            .lock()
            .await
            .insert(uuid, MonitorHandle { running, task });
    }

    pub async fn stop_ip_monitor(&self, uuid: &str) {
        if let Some(handle) = self.monitoring_info.lock().await.remove(uuid) {
            handle.running.store(false, Ordering::SeqCst);
            handle.task.abort();
        }
    }

    /// Starts IP monitoring for `device` if it carries both a
    /// `macAddress` and an `ipAddress` resource (the contract §4.5
    /// gives IP-addressable drivers); a no-op otherwise. Shared by the
    /// Device-Found Pipeline and the startup device-initialization
    /// task, the two places a device's resources become known.
    pub(super) async fn start_ip_monitor_if_applicable(self: &Arc<Core>, device: &Device) {
        if device.resource("ipAddress").is_none() {
            return;
        }

        let Some(mac) = device.resource("macAddress").and_then(|r| r.value()) else {
            return;
        };

        match mac.parse::<MacAddress>() {
            Ok(mac) => self.start_ip_monitor(device.uuid().to_string(), mac).await,
            Err(_) => warn!(uuid = device.uuid(), "macAddress resource is not a valid mac"),
        }
    }
}

#[instrument(skip(core, running), fields(uuid = %uuid))]
async fn run_ip_monitor(core: Arc<Core>, uuid: String, mac: MacAddress, running: Arc<AtomicBool>) {
    let mut last_ip: Option<String> = None;
    let mut consecutive_failures = 0u32;

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(POLL_INTERVAL).await;

        let device = match core.store().await.get_device(&uuid).await {
            Ok(Some(d)) => d,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to load device for ip monitor");
                continue;
            }
        };

        let Some(driver) = core.registry().get(device.managing_driver_name()) else {
            break;
        };

        let Some(res) = device.resource("ipAddress") else {
            continue;
        };

        match driver.read_resource(&device, res).await {
            Ok(value) => {
                consecutive_failures = 0;
                core.on_comm_restore(&uuid).await;

                if value != last_ip {
                    if let Some(ip) = &value {
                        let _ = core
                            .update_resource(&uuid, None, "ipAddress", Some(ip.clone()), None)
                            .await;
                    }
                    last_ip = value;
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(error = %e, consecutive_failures, "ip monitor poll failed");

                if consecutive_failures >= FAILURES_BEFORE_RECOVERY {
                    core.on_comm_fail(&uuid).await;

                    if let Some(recovery) = &core.ip_recovery {
                        if let Some(new_ip) = recovery.recover(&mac).await {
                            let _ = core
                                .update_resource(&uuid, None, "ipAddress", Some(new_ip.clone()), None)
                                .await;
                            last_ip = Some(new_ip);
                            consecutive_failures = 0;
                        }
                    }
                }
            }
        }
    }

    core.monitoring_info.lock().await.remove(&uuid);
}
