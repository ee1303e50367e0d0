//! Wire payloads exchanged with a thermostat's `/info` and `/setpoint`
//! HTTP endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Info {
    pub mac_address: String,
    pub manufacturer: String,
    pub model: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub current_temperature: f64,
    pub setpoint: f64,
}

#[derive(Debug, Serialize)]
pub struct SetpointRequest {
    pub setpoint: f64,
}
