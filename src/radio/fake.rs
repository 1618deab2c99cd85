//! A [`HostRadio`] that records every request instead of talking to hardware.

use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::device::types::DeviceIdentity;
use crate::radio::{HostRadio, PowerState};

#[derive(Debug, Clone, PartialEq)]
pub enum RadioCommand {
    StartScan { services: Vec<Uuid>, allow_duplicates: bool },
    StopScan,
    Connect(DeviceIdentity),
    CancelConnection(DeviceIdentity),
    DiscoverServices { id: DeviceIdentity, filter: Vec<Uuid> },
    DiscoverCharacteristics { id: DeviceIdentity, service: Uuid, filter: Vec<Uuid> },
    SetNotify { id: DeviceIdentity, characteristic: Uuid, enabled: bool },
    Write { id: DeviceIdentity, characteristic: Uuid, value: Vec<u8>, with_response: bool },
    Read { id: DeviceIdentity, characteristic: Uuid },
}

#[derive(Debug)]
struct FakeRadioInner {
    power_state: PowerState,
    commands: Vec<RadioCommand>,
}

#[derive(Debug, Clone)]
pub struct FakeRadio {
    inner: Arc<Mutex<FakeRadioInner>>,
}

impl FakeRadio {
    pub fn new(power_state: PowerState) -> Self {
        let inner = FakeRadioInner {
            power_state,
            commands: Vec::new(),
        };
        FakeRadio { inner: Arc::new(Mutex::new(inner)) }
    }

    pub fn set_power_state(&self, power_state: PowerState) {
        self.inner.lock().expect("Failed to lock FakeRadio inner").power_state = power_state;
    }

    pub fn commands(&self) -> Vec<RadioCommand> {
        self.inner.lock().expect("Failed to lock FakeRadio inner").commands.clone()
    }

    /// Returns the recorded commands and forgets them.
    pub fn take_commands(&self) -> Vec<RadioCommand> {
        std::mem::take(&mut self.inner.lock().expect("Failed to lock FakeRadio inner").commands)
    }

    /// The payloads of all recorded writes, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                RadioCommand::Write { value, .. } => Some(value),
                _ => None,
            })
            .collect()
    }

    fn record(&self, command: RadioCommand) {
        self.inner.lock().expect("Failed to lock FakeRadio inner").commands.push(command);
    }
}

impl Default for FakeRadio {
    fn default() -> Self {
        FakeRadio::new(PowerState::PoweredOn)
    }
}

impl HostRadio for FakeRadio {
    fn power_state(&self) -> PowerState {
        self.inner.lock().expect("Failed to lock FakeRadio inner").power_state
    }

    fn start_scan(&self, services: &[Uuid], allow_duplicates: bool) {
        self.record(RadioCommand::StartScan { services: services.to_vec(), allow_duplicates });
    }

    fn stop_scan(&self) {
        self.record(RadioCommand::StopScan);
    }

    fn connect(&self, id: &DeviceIdentity) {
        self.record(RadioCommand::Connect(id.clone()));
    }

    fn cancel_connection(&self, id: &DeviceIdentity) {
        self.record(RadioCommand::CancelConnection(id.clone()));
    }

    fn discover_services(&self, id: &DeviceIdentity, filter: &[Uuid]) {
        self.record(RadioCommand::DiscoverServices { id: id.clone(), filter: filter.to_vec() });
    }

    fn discover_characteristics(&self, id: &DeviceIdentity, service: Uuid, filter: &[Uuid]) {
        self.record(RadioCommand::DiscoverCharacteristics { id: id.clone(), service, filter: filter.to_vec() });
    }

    fn set_notify(&self, id: &DeviceIdentity, characteristic: Uuid, enabled: bool) {
        self.record(RadioCommand::SetNotify { id: id.clone(), characteristic, enabled });
    }

    fn write_value(&self, id: &DeviceIdentity, characteristic: Uuid, value: &[u8], with_response: bool) {
        self.record(RadioCommand::Write { id: id.clone(), characteristic, value: value.to_vec(), with_response });
    }

    fn read_value(&self, id: &DeviceIdentity, characteristic: Uuid) {
        self.record(RadioCommand::Read { id: id.clone(), characteristic });
    }
}
