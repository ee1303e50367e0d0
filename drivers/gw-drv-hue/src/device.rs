//! Wire payloads exchanged with a Hue-style bridge's `/light` resource.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct LightState {
    pub on: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeLight {
    #[serde(rename = "uniqueid")]
    pub unique_id: String,
    pub name: String,
    pub state: LightState,
    pub modelid: String,
    #[serde(rename = "swversion")]
    pub sw_version: String,
    pub manufacturername: String,
}

#[derive(Debug, Serialize)]
pub struct SetState {
    pub on: bool,
}

/// A light paired with the bridge, tracked by the driver between
/// `configureDevice` and subsequent resource reads/writes.
#[derive(Debug, Clone)]
pub struct PairedLight {
    pub bridge_id: String,
    pub endpoint_id: String,
}
