//! The Event Producer (§4.7): a single-producer, many-subscriber
//! broadcaster of lifecycle and resource-change events.

use crate::model::mode::Mode;
use crate::model::{Device, Endpoint, Resource};
use crate::types::Error;
use std::sync::Mutex;
use tokio::sync::broadcast;

const MASKED_VALUE: &str = "(encrypted)";

/// A point-in-time copy of a resource suitable for publication.
/// SENSITIVE values are replaced with the literal `(encrypted)`
/// before the snapshot ever leaves the store (§4.7).
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub id: String,
    pub resource_type: String,
    pub value: Option<String>,
    pub mode: Mode,
}

impl From<&Resource> for ResourceSnapshot {
    fn from(r: &Resource) -> Self {
        let value = if r.mode().contains(Mode::SENSITIVE) {
            r.value().map(|_| MASKED_VALUE.to_string())
        } else {
            r.value().map(String::from)
        };

        ResourceSnapshot {
            id: r.id().to_string(),
            resource_type: r.resource_type().to_string(),
            value,
            mode: r.mode(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub id: String,
    pub profile: String,
    pub resources: Vec<ResourceSnapshot>,
}

impl From<&Endpoint> for EndpointSnapshot {
    fn from(ep: &Endpoint) -> Self {
        EndpointSnapshot {
            id: ep.id().to_string(),
            profile: ep.profile().to_string(),
            resources: ep.resources().map(ResourceSnapshot::from).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub uuid: String,
    pub device_class: String,
    pub resources: Vec<ResourceSnapshot>,
    pub endpoints: Vec<EndpointSnapshot>,
}

impl From<&Device> for DeviceSnapshot {
    fn from(d: &Device) -> Self {
        DeviceSnapshot {
            uuid: d.uuid().to_string(),
            device_class: d.device_class().to_string(),
            resources: d.resources().map(ResourceSnapshot::from).collect(),
            endpoints: d.endpoints().map(EndpointSnapshot::from).collect(),
        }
    }
}

/// Identifies the owner of an updated resource: either a device
/// itself, or one of its endpoints.
#[derive(Debug, Clone)]
pub enum Owner {
    Device { uuid: String, device_class: String },
    Endpoint { device_uuid: String, endpoint_id: String, profile: String },
}

#[derive(Debug, Clone)]
pub enum EventKind {
    DiscoveryStarted { classes: Vec<String>, timeout_seconds: u64 },
    DiscoveryStopped { class: String },
    DeviceDiscovered { early_details: String },
    DeviceRejected { early_details: String },
    DeviceDiscoveryFailed { uuid: String, class: String },
    DeviceDiscoveryCompleted { device: DeviceSnapshot },
    DeviceConfigureStarted { class: String, uuid: String },
    DeviceConfigureCompleted { class: String, uuid: String },
    DeviceConfigureFailed { class: String, uuid: String },
    DeviceAdded { uuid: String, uri: String, class: String },
    DeviceRemoved { uuid: String, class: String },
    DeviceRecovered { uuid: String, class: String, uri: String },
    EndpointAdded { endpoint: EndpointSnapshot, class: String },
    EndpointRemoved { endpoint: EndpointSnapshot, class: String },
    ResourceUpdated {
        resource: ResourceSnapshot,
        root_device_id: String,
        root_device_class: String,
        owner: Owner,
        metadata: Option<String>,
    },
    ReadyForDevices,
    ZigbeeChannelChanged { ok: bool, current_chan: u8, target_chan: u8 },
}

/// An event as published on the broadcast channel: a stable id, a
/// wall-clock timestamp, and the payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
}

/// Broadcasts events to every subscriber, assigning monotonically
/// increasing ids and keeping publish order deterministic (§5).
pub struct EventProducer {
    tx: broadcast::Sender<Event>,
    next_id: Mutex<u64>,
}

impl EventProducer {
    pub fn new(capacity: usize) -> EventProducer {
        let (tx, _rx) = broadcast::channel(capacity);

        EventProducer {
            tx,
            next_id: Mutex::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes `kind`, stamping it with the next event id and the
    /// current time. Returns `Error::MissingPeer` only if somehow no
    /// subscriber has ever been created; a normal "nobody is listening
    /// right now" is not an error (`broadcast::Sender::send` failing
    /// with no receivers is swallowed, matching a fire-and-forget
    /// publisher).
    pub fn publish(&self, kind: EventKind) -> Result<u64, Error> {
        let mut guard = self
            .next_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let event_id = *guard;
        *guard += 1;
        drop(guard);

        let event = Event {
            event_id,
            timestamp: chrono::Utc::now(),
            kind,
        };

        let _ = self.tx.send(event);
        Ok(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Device, Resource};
    use crate::model::mode::Mode;

    #[test]
    fn test_sensitive_value_masked_in_snapshot() {
        let mut d = Device::new("abc", "thermostat", 1, "gw-drv-thermostat", 0);
        let mut r = Resource::new(
            "wifiPassword",
            "secret".into(),
            Mode::READABLE | Mode::SENSITIVE,
        );
        r.set_value(Some("hunter2".to_string()), 1);
        d.add_resource(r);

        let snap = DeviceSnapshot::from(&d);
        let res = snap.resources.iter().find(|r| r.id == "wifiPassword").unwrap();

        assert_eq!(res.value.as_deref(), Some("(encrypted)"));
    }

    #[tokio::test]
    async fn test_publish_assigns_increasing_ids() {
        let producer = EventProducer::new(16);
        let mut rx = producer.subscribe();

        let id1 = producer.publish(EventKind::ReadyForDevices).unwrap();
        let id2 = producer
            .publish(EventKind::DiscoveryStopped { class: "light".to_string() })
            .unwrap();

        assert!(id2 > id1);

        let e1 = rx.recv().await.unwrap();
        let e2 = rx.recv().await.unwrap();

        assert_eq!(e1.event_id, id1);
        assert_eq!(e2.event_id, id2);
    }
}
