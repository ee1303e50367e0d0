//! `[[driver]]` config section for the Hue driver:
//!
//! ```toml
//! [[driver]]
//! name = "hue"
//! prefix = "hue"
//!
//! [driver.cfg]
//! bridge_host = "192.168.1.40"
//! app_key = "abcdef0123456789"
//! ```

use gw_api::{driver::DriverConfig, Error};
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct Params {
    pub bridge_host: Arc<str>,
    pub app_key: Arc<str>,
}

impl TryFrom<DriverConfig> for Params {
    type Error = Error;

    fn try_from(cfg: DriverConfig) -> Result<Self, Self::Error> {
        cfg.parse_into()
    }
}
