//! Minimal driver establishing the ZigBee device-class contract. Radio
//! pairing, binding, and cluster handling are a hardware-specific
//! concern out of scope here; this crate only wires a ZigBee-class
//! driver into the registry and the shared-subsystem comm-fail path so
//! a real radio driver has a grounded shape to fill in.

use async_trait::async_trait;
use gw_api::driver::{DeviceDescriptor, Driver, SinkHandle, ValueBag};
use gw_api::model::{Device, Resource};
use gw_api::{Error, Result};
use tracing::info;

pub const DRIVER_NAME: &str = "zigbee";
pub const DEVICE_CLASS: &str = "zigbee-device";
const SUBSYSTEM: &str = "zigbee-radio";

pub struct ZigbeeDriver {
    classes: Vec<String>,
    #[allow(dead_code)]
    sink: SinkHandle,
}

impl ZigbeeDriver {
    pub fn new(_cfg: gw_api::driver::DriverConfig, sink: SinkHandle) -> Result<ZigbeeDriver> {
        Ok(ZigbeeDriver {
            classes: vec![DEVICE_CLASS.to_string()],
            sink,
        })
    }
}

#[async_trait]
impl Driver for ZigbeeDriver {
    fn driver_name(&self) -> &str {
        DRIVER_NAME
    }

    fn supported_device_classes(&self) -> &[String] {
        &self.classes
    }

    async fn startup(&self) -> Result<()> {
        info!("zigbee stub driver starting, no radio attached");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn discover_devices(&self, _class: &str) -> Result<()> {
        Err(Error::NotFound)
    }

    async fn stop_discovering_devices(&self, _class: &str) -> Result<()> {
        Ok(())
    }

    async fn configure_device(
        &self,
        _device: &mut Device,
        _descriptor: Option<&DeviceDescriptor>,
    ) -> Result<()> {
        Err(Error::NotFound)
    }

    async fn fetch_initial_resource_values(
        &self,
        _device: &Device,
        _bag: &mut ValueBag,
    ) -> Result<()> {
        Ok(())
    }

    async fn register_resources(&self, _device: &mut Device, _bag: &ValueBag) -> Result<()> {
        Ok(())
    }

    async fn read_resource(&self, _device: &Device, _res: &Resource) -> Result<Option<String>> {
        Err(Error::NotFound)
    }

    async fn write_resource(
        &self,
        _device: &Device,
        _res: &Resource,
        _prev: Option<&str>,
        _new: Option<&str>,
    ) -> Result<bool> {
        Err(Error::NotFound)
    }

    async fn device_removed(&self, _device: &Device) {}

    fn subsystem_name(&self) -> Option<&str> {
        Some(SUBSYSTEM)
    }
}
