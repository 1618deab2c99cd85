use uuid::Uuid;

use crate::device::types::{DeviceEvent, DeviceIdentity, WriteRequest};

/// Everything the coordinator reports to its owner, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    Discovered(DeviceIdentity),
    Restored(DeviceIdentity),
    Device {
        id: DeviceIdentity,
        event: DeviceEvent,
    },
    // the device was invalidated and removed from the device table
    Invalidated(DeviceIdentity),
}

/// Requests that can be sent to a running coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorCommand {
    StartDiscovery {
        services: Vec<Uuid>,
        detect_unreachable: bool,
    },
    StopDiscovery,
    Connect(DeviceIdentity),
    Disconnect(DeviceIdentity),
    WriteMatrix(DeviceIdentity, WriteRequest),
    SetMatrixBrightness(DeviceIdentity, f32),
    Invalidate(DeviceIdentity),
}
