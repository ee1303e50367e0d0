#![deny(unsafe_code)]

use gw_api::driver::{DriverConfig, Registry, SinkHandle};
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod core;

use core::supervisor;

// Initializes the `gatewayd` application. It determines the
// configuration and sets up the logger. It returns `Some(Config)`
// with the found configuration, if the application is to run. It
// returns `None` if the program should exit (because a command line
// option asked for a "usage" message, for instance.)

async fn init_app() -> Option<config::Config> {
    if let Some(cfg) = config::get().await {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(cfg.get_log_level())
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("unable to set global default subscriber");
        Some(cfg)
    } else {
        None
    }
}

fn build_store(
    cfg: &config::Backend,
) -> gw_api::Result<Box<dyn gw_api::store::ResourceStore + Send>> {
    match cfg.kind.as_str() {
        "memory" => {
            let store = gw_store_memory::MemoryStore::new(cfg.state_file.as_deref())?;

            Ok(Box::new(store))
        }
        other => Err(gw_api::Error::ConfigError(format!(
            "unknown backend kind '{}'",
            other
        ))),
    }
}

fn build_driver(
    name: &str,
    cfg: Option<DriverConfig>,
    sink: SinkHandle,
) -> gw_api::Result<Arc<dyn gw_api::driver::Driver>> {
    match name {
        #[cfg(feature = "gw-drv-hue")]
        "hue" => Ok(Arc::new(gw_drv_hue::HueDriver::new(cfg.unwrap_or_default(), sink)?)),

        #[cfg(feature = "gw-drv-thermostat")]
        "thermostat" => Ok(Arc::new(gw_drv_thermostat::ThermostatDriver::new(
            cfg.unwrap_or_default(),
            sink,
        )?)),

        #[cfg(feature = "gw-drv-zigbee")]
        "zigbee" => Ok(Arc::new(gw_drv_zigbee::ZigbeeDriver::new(
            cfg.unwrap_or_default(),
            sink,
        )?)),

        other => Err(gw_api::Error::ConfigError(format!(
            "no driver named '{}' (not compiled in, or unknown)",
            other
        ))),
    }
}

// Runs the main body of the application: builds the resource store
// and driver registry from the configuration, starts the core and a
// supervisor task per configured driver, and blocks until a shutdown
// signal arrives.

async fn run() -> gw_api::Result<()> {
    let Some(cfg) = init_app().await else {
        return Ok(());
    };

    info!("starting gatewayd");

    let store = build_store(&cfg.backend)?;
    let mut registry = Registry::new();
    let sink = SinkHandle::new();

    for d in &cfg.driver {
        let driver = build_driver(&d.name, d.cfg.clone(), sink.clone())?;

        registry.register(driver);
    }

    // Neither the device-descriptor lookup service, the SSDP-like
    // IP-recovery service, nor a legacy-device migrator has a concrete
    // implementation in this deployment; all three are external
    // collaborators out of scope here.
    let core = core::Core::new(store, registry, None, None, None);
    sink.bind(core.clone());

    info!("starting drivers");

    let names: Vec<_> = core.registry().driver_names().cloned().collect();
    let mut supervisors = Vec::with_capacity(names.len());

    for name in &names {
        if let Some(driver) = core.registry().get(name) {
            supervisors.push(tokio::spawn(supervisor::supervise(name.clone(), driver)));
        }
    }

    core.subsystem_ready().await;
    core.descriptor_collaborator_ready().await;

    info!("gatewayd running, awaiting shutdown signal");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait on shutdown signal");
    }

    warn!("shutting down");

    for handle in supervisors {
        handle.abort();
    }

    for name in &names {
        if let Some(driver) = core.registry().get(name) {
            core::startup::shutdown_driver_with_cap(name, driver).await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERROR: {e:?}")
    }
}
