//! Discovery Coordinator (§4.4): starts and stops per-class discovery
//! sessions, each a cooperative worker cancellable by signal or
//! timeout.

use super::Core;
use gw_api::events::EventKind;
use gw_api::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

/// A running discovery session for one device class.
pub struct Session {
    finding_orphans: bool,
    cancel: Arc<Notify>,
}

impl Session {
    fn findorphans(&self) -> bool {
        self.finding_orphans
    }
}

impl Core {
    /// `discoverStart(classes, timeoutSeconds, findOrphans)`. All-or-
    /// nothing: if any requested class has no supporting driver (or,
    /// when `find_orphans`, no driver advertising `recoverDevices`),
    /// the whole call is rejected and no session is spawned.
    #[instrument(skip(self))]
    pub async fn discover_start(
        self: &Arc<Core>,
        classes: Vec<String>,
        timeout_seconds: u64,
        find_orphans: bool,
    ) -> bool {
        for class in &classes {
            if !self.registry().supports_class(class) {
                warn!(class, "no driver supports this class");
                return false;
            }

            if find_orphans
                && !self
                    .registry()
                    .drivers_for_class(class)
                    .iter()
                    .any(|d| d.supports_recover_devices())
            {
                warn!(class, "no driver advertises orphan recovery for this class");
                return false;
            }
        }

        let mut guard = self.active_discoveries.lock().await;

        for class in &classes {
            if guard.contains_key(class) {
                warn!(class, "discovery already active for this class, ignoring");
                return false;
            }
        }

        for class in &classes {
            let cancel = Arc::new(Notify::new());

            guard.insert(
                class.clone(),
                Session {
                    finding_orphans: find_orphans,
                    cancel: cancel.clone(),
                },
            );

            let core = self.clone();
            let class = class.clone();

            tokio::spawn(run_session(core, class, timeout_seconds, find_orphans, cancel));
        }
        drop(guard);

        let _ = self.events().publish(EventKind::DiscoveryStarted {
            classes,
            timeout_seconds,
        });
        true
    }

    /// `discoverStop(classes?)`: `None` signals every active session.
    pub async fn discover_stop(&self, classes: Option<Vec<String>>) {
        let guard = self.active_discoveries.lock().await;

        match classes {
            Some(classes) => {
                for class in classes {
                    if let Some(session) = guard.get(&class) {
                        session.cancel.notify_one();
                    }
                }
            }
            None => {
                for session in guard.values() {
                    session.cancel.notify_one();
                }
            }
        }
    }

    /// True iff any active session was started with `findOrphans`.
    pub async fn is_in_recovery_mode(&self) -> bool {
        self.active_discoveries
            .lock()
            .await
            .values()
            .any(Session::findorphans)
    }
}

#[instrument(skip(core, cancel), fields(class = %class))]
async fn run_session(
    core: Arc<Core>,
    class: String,
    timeout_seconds: u64,
    find_orphans: bool,
    cancel: Arc<Notify>,
) {
    info!("discovery session starting");

    let drivers = core.registry().drivers_for_class(&class);

    let mut started = Vec::new();
    for driver in &drivers {
        let result = if find_orphans {
            driver.recover_devices(&class).await
        } else {
            driver.discover_devices(&class).await
        };

        match result {
            Ok(()) => started.push(driver.clone()),
            Err(Error::NotFound) if find_orphans => {
                // Driver doesn't support orphan recovery; skip it.
            }
            Err(e) => warn!(driver = driver.driver_name(), error = %e, "failed to start discovery"),
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(timeout_seconds)) => {
            info!("discovery session timed out");
        }
        _ = cancel.notified() => {
            info!("discovery session signalled");
        }
    }

    for driver in &started {
        if let Err(e) = driver.stop_discovering_devices(&class).await {
            warn!(driver = driver.driver_name(), error = %e, "failed to stop discovery");
        }
    }

    core.active_discoveries.lock().await.remove(&class);
    let _ = core.events().publish(EventKind::DiscoveryStopped { class });
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{make_core_with_registry, StubDriver};
    use gw_api::driver::Registry;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_discover_start_rejects_unsupported_class() {
        let core = make_core_with_registry(Registry::new());

        assert!(!core.discover_start(vec!["no-such-class".to_string()], 5, false).await);
        assert!(!core.is_in_recovery_mode().await);
    }

    #[tokio::test]
    async fn test_discover_start_rejects_find_orphans_without_recovery_support() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver::new("stub", "stub-class")));
        let core = make_core_with_registry(registry);

        // StubDriver never overrides recover_devices/supports_recover_devices,
        // so it inherits the trait's "not supported" defaults.
        assert!(!core.discover_start(vec!["stub-class".to_string()], 5, true).await);
    }

    #[tokio::test]
    async fn test_discover_start_stop_happy_path() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver::new("stub", "stub-class")));
        let core = make_core_with_registry(registry);

        assert!(core.discover_start(vec!["stub-class".to_string()], 30, false).await);
        assert!(!core.is_in_recovery_mode().await);

        core.discover_stop(None).await;

        // Give the spawned session a moment to observe the cancel signal
        // and remove itself from the active-discoveries map.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(core.active_discoveries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_discover_start_rejects_duplicate_class() {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubDriver::new("stub", "stub-class")));
        let core = make_core_with_registry(registry);

        assert!(core.discover_start(vec!["stub-class".to_string()], 30, false).await);
        assert!(!core.discover_start(vec!["stub-class".to_string()], 30, false).await);

        core.discover_stop(None).await;
    }
}
