//! Driver supervision: keeps a configured driver instance running,
//! restarting it with exponential backoff if its `startup` task ever
//! returns or panics.

use gw_api::driver::Driver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const START_DELAY_SECS: u64 = 5;
const MAX_DELAY_SECS: u64 = 600;

/// Runs `driver.startup()` in a loop, doubling the restart delay on
/// each failure (capped at `MAX_DELAY_SECS`) and resetting it once an
/// instance completes a cycle without error.
///
/// This never returns; it's meant to be spawned as its own task per
/// configured driver instance.
pub async fn supervise(name: Arc<str>, driver: Arc<dyn Driver>) {
    let mut restart_delay = START_DELAY_SECS;

    info!(driver = %name, "starting instance of driver");

    loop {
        let result = driver.startup().await;

        match result {
            Ok(()) => {
                restart_delay = START_DELAY_SECS;
                info!(driver = %name, "driver startup completed");
            }
            Err(e) => error!(driver = %name, error = %e, "driver startup failed"),
        }

        warn!(driver = %name, delay = restart_delay, "delay before restarting driver");
        tokio::time::sleep(Duration::from_secs(restart_delay)).await;

        restart_delay = std::cmp::min(restart_delay * 2, MAX_DELAY_SECS);
        info!(driver = %name, "restarting instance of driver");
    }
}
