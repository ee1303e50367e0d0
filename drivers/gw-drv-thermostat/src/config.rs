//! `[[driver]]` config section for the thermostat driver:
//!
//! ```toml
//! [[driver]]
//! name = "thermostat"
//! prefix = "thermostat"
//!
//! [driver.cfg]
//! host = "172.16.12.116"
//! ```

use gw_api::{driver::DriverConfig, Error};
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct Params {
    pub host: Arc<str>,
}

impl TryFrom<DriverConfig> for Params {
    type Error = Error;

    fn try_from(cfg: DriverConfig) -> Result<Self, Self::Error> {
        cfg.parse_into()
    }
}
