//! Boundary to the host bluetooth stack.
//!
//! The core never awaits the radio: requests are issued through [`HostRadio`] and return
//! immediately, their outcomes arrive later as [`RadioEvent`]s.

use uuid::Uuid;

use crate::device::types::DeviceIdentity;

pub mod btleplug;
pub mod fake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// What a peripheral sent in one advertisement packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    PeripheralDiscovered {
        id: DeviceIdentity,
        advertisement: Advertisement,
    },
    Connected {
        id: DeviceIdentity,
    },
    FailedToConnect {
        id: DeviceIdentity,
        error: Option<String>,
    },
    Disconnected {
        id: DeviceIdentity,
        error: Option<String>,
    },
    ServicesDiscovered {
        id: DeviceIdentity,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        id: DeviceIdentity,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    ValueUpdated {
        id: DeviceIdentity,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    WriteAcknowledged {
        id: DeviceIdentity,
        characteristic: Uuid,
    },
    PowerStateChanged(PowerState),
    // peripherals that were still connected to a previous instance of this process
    SessionRestored(Vec<DeviceIdentity>),
}

impl RadioEvent {
    /// The peripheral this event is about, if any.
    pub fn peripheral(&self) -> Option<&DeviceIdentity> {
        match self {
            RadioEvent::PeripheralDiscovered { id, .. }
            | RadioEvent::Connected { id }
            | RadioEvent::FailedToConnect { id, .. }
            | RadioEvent::Disconnected { id, .. }
            | RadioEvent::ServicesDiscovered { id, .. }
            | RadioEvent::CharacteristicsDiscovered { id, .. }
            | RadioEvent::ValueUpdated { id, .. }
            | RadioEvent::WriteAcknowledged { id, .. } => Some(id),
            RadioEvent::PowerStateChanged(_) | RadioEvent::SessionRestored(_) => None,
        }
    }
}

/// Requests the core issues to the host bluetooth stack.
pub trait HostRadio {
    fn power_state(&self) -> PowerState;

    fn start_scan(&self, services: &[Uuid], allow_duplicates: bool);

    fn stop_scan(&self);

    fn connect(&self, id: &DeviceIdentity);

    fn cancel_connection(&self, id: &DeviceIdentity);

    fn discover_services(&self, id: &DeviceIdentity, filter: &[Uuid]);

    fn discover_characteristics(&self, id: &DeviceIdentity, service: Uuid, filter: &[Uuid]);

    fn set_notify(&self, id: &DeviceIdentity, characteristic: Uuid, enabled: bool);

    fn write_value(&self, id: &DeviceIdentity, characteristic: Uuid, value: &[u8], with_response: bool);

    fn read_value(&self, id: &DeviceIdentity, characteristic: Uuid);
}
