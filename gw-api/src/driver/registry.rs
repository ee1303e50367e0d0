//! Maps driver names and device classes to running driver instances
//! (§4.2 "The Registry holds drivers by name and by supported class").

use super::{Driver, Name};
use std::collections::HashMap;
use std::sync::Arc;

/// Holds every configured driver instance, indexed both by name and
/// by the device classes it advertises support for.
#[derive(Default)]
pub struct Registry {
    by_name: HashMap<Name, Arc<dyn Driver>>,
    by_class: HashMap<String, Vec<Name>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            by_name: HashMap::new(),
            by_class: HashMap::new(),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let name: Name = Arc::from(driver.driver_name());

        for class in driver.supported_device_classes() {
            self.by_class
                .entry(class.clone())
                .or_default()
                .push(name.clone());
        }
        self.by_name.insert(name, driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.by_name.get(name).cloned()
    }

    /// Returns the ordered set of drivers that support `class`
    /// (`getDriversByClass`, §4.2).
    pub fn drivers_for_class(&self, class: &str) -> Vec<Arc<dyn Driver>> {
        self.by_class
            .get(class)
            .map(|names| names.iter().filter_map(|n| self.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn supports_class(&self, class: &str) -> bool {
        self.by_class.get(class).is_some_and(|v| !v.is_empty())
    }

    /// At least one driver supporting `class` advertises
    /// `recoverDevices` capability. The trait gives every driver a
    /// default `recoverDevices` that returns `Error::NotFound`, so
    /// advertising support is tracked separately by the caller (the
    /// discovery coordinator asks each driver and records which
    /// succeeded); this helper only tells you whether any driver
    /// exists for the class at all.
    pub fn driver_names(&self) -> impl Iterator<Item = &Name> {
        self.by_name.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DeviceDescriptor, ValueBag};
    use crate::model::{Device, Endpoint, Resource};
    use crate::types::Error;

    struct Stub {
        name: String,
        classes: Vec<String>,
    }

    #[async_trait::async_trait]
    impl Driver for Stub {
        fn driver_name(&self) -> &str {
            &self.name
        }

        fn supported_device_classes(&self) -> &[String] {
            &self.classes
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
            _device: &mut Device,
            _descriptor: Option<&DeviceDescriptor>,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn fetch_initial_resource_values(
            &self,
            _device: &Device,
            _bag: &mut ValueBag,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn register_resources(
            &self,
            _device: &mut Device,
            _bag: &ValueBag,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn read_resource(
            &self,
            _device: &Device,
            _res: &Resource,
        ) -> Result<Option<String>, Error> {
            Ok(None)
        }

        async fn write_resource(
            &self,
            _device: &Device,
            _res: &Resource,
            _prev: Option<&str>,
            _new: Option<&str>,
        ) -> Result<bool, Error> {
            Ok(true)
        }

        async fn device_removed(&self, _device: &Device) {}
    }

    #[test]
    fn test_register_and_lookup_by_class() {
        let mut reg = Registry::new();

        reg.register(Arc::new(Stub {
            name: "hue".to_string(),
            classes: vec!["light".to_string()],
        }));

        assert!(reg.supports_class("light"));
        assert!(!reg.supports_class("thermostat"));
        assert_eq!(reg.drivers_for_class("light").len(), 1);
        assert!(reg.get("hue").is_some());
        assert!(reg.get("missing").is_none());
    }
}
