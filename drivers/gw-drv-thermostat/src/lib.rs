//! Driver for HTTP/JSON network thermostats. Exposes `ipAddress` and
//! `macAddress` so the core's IP monitor (§4.5) takes over liveness
//! checking and address recovery once the device is registered.

mod config;
mod payload;

use async_trait::async_trait;
use gw_api::driver::{DeviceDescriptor, DeviceFoundDetails, Driver, SinkHandle, ValueBag};
use gw_api::model::mode::Mode;
use gw_api::model::{CachingPolicy, Device, Resource, ResourceType};
use gw_api::{Error, Result};
use payload::{Info, SetpointRequest};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

pub const DRIVER_NAME: &str = "thermostat";
pub const DEVICE_CLASS: &str = "thermostat";

pub struct ThermostatDriver {
    client: Client,
    initial_host: Arc<str>,
    sink: SinkHandle,
    classes: Vec<String>,
    pending: Mutex<HashMap<String, Info>>,
}

impl ThermostatDriver {
    pub fn new(cfg: gw_api::driver::DriverConfig, sink: SinkHandle) -> Result<ThermostatDriver> {
        let params: config::Params = cfg.try_into()?;

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(1500))
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::DriverFailure(format!("can't build http client: {e}")))?;

        Ok(ThermostatDriver {
            client,
            initial_host: params.host,
            sink,
            classes: vec![DEVICE_CLASS.to_string()],
            pending: Mutex::new(HashMap::new()),
        })
    }

    async fn fetch_info(&self, host: &str) -> Result<Info> {
        let url = format!("http://{}/info", host);

        self.client
            .get(&url)
            .send()
            .await
            .map_err(|_| Error::CommunicationLost)?
            .error_for_status()
            .map_err(|_| Error::CommunicationLost)?
            .json()
            .await
            .map_err(|e| Error::DriverFailure(format!("couldn't decode thermostat info: {e}")))
    }
}

#[async_trait]
impl Driver for ThermostatDriver {
    fn driver_name(&self) -> &str {
        DRIVER_NAME
    }

    fn supported_device_classes(&self) -> &[String] {
        &self.classes
    }

    async fn startup(&self) -> Result<()> {
        info!(host = %self.initial_host, "thermostat driver starting");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self))]
    async fn discover_devices(&self, class: &str) -> Result<()> {
        if class != DEVICE_CLASS {
            return Ok(());
        }

        let info = self.fetch_info(&self.initial_host).await?;
        let uuid = format!("thermostat-{}", info.mac_address);

        let details = DeviceFoundDetails {
            uuid: uuid.clone(),
            device_class: DEVICE_CLASS.to_string(),
            device_class_version: 1,
            manufacturer: info.manufacturer.clone(),
            model: info.model.clone(),
            hardware_version: info.hardware_version.clone(),
            firmware_version: info.firmware_version.clone(),
            recovery_mode: false,
        };

        self.pending.lock().await.insert(uuid, info);

        let accepted = self
            .sink
            .device_found(details, Arc::from(DRIVER_NAME), false)
            .await;

        if !accepted {
            warn!("thermostat was rejected by the device-found pipeline");
        }

        Ok(())
    }

    async fn stop_discovering_devices(&self, _class: &str) -> Result<()> {
        Ok(())
    }

    async fn configure_device(
        &self,
        device: &mut Device,
        _descriptor: Option<&DeviceDescriptor>,
    ) -> Result<()> {
        if !self.pending.lock().await.contains_key(device.uuid()) {
            return Err(Error::NotFound);
        }

        device.add_resource(Resource::new(
            "ipAddress",
            ResourceType::from("string"),
            Mode::READABLE | Mode::EMIT_EVENTS,
        ));
        device.add_resource(Resource::new(
            "macAddress",
            ResourceType::from("string"),
            Mode::READABLE,
        ));
        device.add_resource(Resource::new(
            "setpoint",
            ResourceType::from("float"),
            Mode::READABLE | Mode::WRITEABLE | Mode::EMIT_EVENTS,
        ));

        let mut current_temp = Resource::new(
            "currentTemperature",
            ResourceType::from("float"),
            Mode::READABLE | Mode::EMIT_EVENTS,
        );
        current_temp.set_caching_policy(CachingPolicy::Never);
        device.add_resource(current_temp);

        Ok(())
    }

    async fn fetch_initial_resource_values(
        &self,
        device: &Device,
        bag: &mut ValueBag,
    ) -> Result<()> {
        let pending = self.pending.lock().await;
        let Some(info) = pending.get(device.uuid()) else {
            return Err(Error::NotFound);
        };

        bag.set("ipAddress", Some(self.initial_host.to_string()));
        bag.set("macAddress", Some(info.mac_address.clone()));
        bag.set("setpoint", Some(info.setpoint.to_string()));
        bag.set("currentTemperature", Some(info.current_temperature.to_string()));

        Ok(())
    }

    async fn register_resources(&self, device: &mut Device, bag: &ValueBag) -> Result<()> {
        self.pending.lock().await.remove(device.uuid());

        for id in ["ipAddress", "macAddress", "setpoint", "currentTemperature"] {
            if let Some(value) = bag.get(id).flatten() {
                if let Some(res) = device.resource_mut(id) {
                    res.set_value(Some(value.to_string()), 0);
                }
            }
        }

        Ok(())
    }

    async fn read_resource(&self, device: &Device, res: &Resource) -> Result<Option<String>> {
        match res.id() {
            "ipAddress" => {
                // Liveness check driven by the core's IP monitor:
                // succeeds iff the address on file still answers.
                let host = res.value().ok_or(Error::NotFound)?;
                self.fetch_info(host).await?;
                Ok(Some(host.to_string()))
            }
            "currentTemperature" => {
                let host = device
                    .resource("ipAddress")
                    .and_then(|r| r.value())
                    .ok_or(Error::NotFound)?;
                let info = self.fetch_info(host).await?;
                Ok(Some(info.current_temperature.to_string()))
            }
            "setpoint" => {
                let host = device
                    .resource("ipAddress")
                    .and_then(|r| r.value())
                    .ok_or(Error::NotFound)?;
                let info = self.fetch_info(host).await?;
                Ok(Some(info.setpoint.to_string()))
            }
            "macAddress" => Ok(res.value().map(String::from)),
            _ => Err(Error::NotFound),
        }
    }

    async fn write_resource(
        &self,
        device: &Device,
        res: &Resource,
        _prev: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        if res.id() != "setpoint" {
            return Err(Error::UnauthorizedMode(format!(
                "{} is not writeable",
                res.id()
            )));
        }

        let setpoint = new
            .ok_or_else(|| Error::InvalidArgument("setpoint requires a value".to_string()))?
            .parse::<f64>()
            .map_err(|_| Error::TypeError)?;

        let host = device
            .resource("ipAddress")
            .and_then(|r| r.value())
            .ok_or(Error::NotFound)?;

        let url = format!("http://{}/setpoint", host);

        self.client
            .put(&url)
            .json(&SetpointRequest { setpoint })
            .send()
            .await
            .map_err(|_| Error::CommunicationLost)?
            .error_for_status()
            .map_err(|_| Error::CommunicationLost)?;

        Ok(true)
    }

    async fn device_removed(&self, device: &Device) {
        self.pending.lock().await.remove(device.uuid());
    }
}
