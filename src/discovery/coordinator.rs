use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::connection::{ConnectionSettings, DeviceConnection, DeviceContext};
use crate::device::constants::ACCESSORY_NAME;
use crate::device::timer::{TimerFired, TimerScheduler};
use crate::device::types::{ConnectionState, DeviceIdentity, WriteRequest};
use crate::device::write_flow::WriteOutcome;
use crate::discovery::types::{CoordinatorCommand, CoordinatorEvent};
use crate::error::ConnectionError;
use crate::radio::{Advertisement, HostRadio, PowerState, RadioEvent};

/// Decides which peripherals become devices.
pub trait DeviceFactory {
    /// `advertisement` is `None` for a peripheral that was restored from a previous session.
    /// Returning `None` ignores the peripheral.
    fn create(&mut self, context: DeviceContext, advertisement: Option<&Advertisement>) -> Option<DeviceConnection>;
}

impl<T> DeviceFactory for T
where
    T: FnMut(DeviceContext, Option<&Advertisement>) -> Option<DeviceConnection>,
{
    fn create(&mut self, context: DeviceContext, advertisement: Option<&Advertisement>) -> Option<DeviceConnection> {
        self(context, advertisement)
    }
}

/// Accepts peripherals that advertise the accessory's local name.
#[derive(Debug, Clone)]
pub struct AccessoryFactory {
    pub name: String,
    pub settings: ConnectionSettings,
}

impl AccessoryFactory {
    pub fn new(settings: ConnectionSettings) -> Self {
        AccessoryFactory {
            name: ACCESSORY_NAME.to_string(),
            settings,
        }
    }
}

impl Default for AccessoryFactory {
    fn default() -> Self {
        AccessoryFactory::new(ConnectionSettings::default())
    }
}

impl DeviceFactory for AccessoryFactory {
    fn create(&mut self, context: DeviceContext, advertisement: Option<&Advertisement>) -> Option<DeviceConnection> {
        if let Some(advertisement) = advertisement {
            if advertisement.local_name.as_deref() != Some(self.name.as_str()) {
                return None;
            }
        }

        Some(DeviceConnection::accessory(context, self.settings.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DiscoveryRequest {
    services: Vec<Uuid>,
    detect_unreachable: bool,
}

/**
 * Owns the radio session and every device found through it.
 *
 * The coordinator is driven by a single sequence of events: radio events, timer firings and
 * commands are handled one at a time, either by `run` or by calling the `handle_*` methods
 * directly. Everything that happens is reported through the `CoordinatorEvent` receiver returned
 * by `new`.
 */
pub struct DiscoveryCoordinator<R: HostRadio, F: DeviceFactory> {
    radio: R,
    factory: F,
    devices: IndexMap<DeviceIdentity, DeviceConnection>,
    timers: TimerScheduler,
    timer_events: UnboundedReceiver<TimerFired>,
    events: UnboundedSender<CoordinatorEvent>,
    power_state: PowerState,
    // re-issued whenever the radio is powered on
    discovery: Option<DiscoveryRequest>,
    restored: Vec<DeviceIdentity>,
}

impl<R: HostRadio, F: DeviceFactory> DiscoveryCoordinator<R, F> {
    pub fn new(radio: R, factory: F) -> (Self, UnboundedReceiver<CoordinatorEvent>) {
        let (timers, timer_events) = TimerScheduler::new();
        let (events, events_receiver) = unbounded::<CoordinatorEvent>();
        let power_state = radio.power_state();

        let coordinator = DiscoveryCoordinator {
            radio,
            factory,
            devices: IndexMap::new(),
            timers,
            timer_events,
            events,
            power_state,
            discovery: None,
            restored: Vec::new(),
        };
        (coordinator, events_receiver)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_some()
    }

    pub fn device(&self, id: &DeviceIdentity) -> Option<&DeviceConnection> {
        self.devices.get(id)
    }

    /// Tracked devices in the order they were found.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceConnection> {
        self.devices.values()
    }

    fn emit(&self, event: CoordinatorEvent) {
        if self.events.unbounded_send(event).is_err() {
            debug!("Coordinator event dropped, receiver is gone");
        }
    }

    fn context(&self, id: &DeviceIdentity) -> DeviceContext {
        DeviceContext {
            identity: id.clone(),
            timers: self.timers.clone(),
            events: self.events.clone(),
        }
    }

    /// Scans for peripherals advertising any of `services`. If the radio is not powered on, scanning
    /// starts as soon as it is.
    pub fn start_discovery(&mut self, services: Vec<Uuid>, detect_unreachable: bool) {
        let request = DiscoveryRequest { services, detect_unreachable };

        if self.power_state == PowerState::PoweredOn {
            info!("Starting discovery (detect unreachable: {})", detect_unreachable);
            self.radio.start_scan(&request.services, request.detect_unreachable);
        } else {
            info!("Radio is {:?}, discovery starts once it is powered on", self.power_state);
        }

        self.discovery = Some(request);
    }

    pub fn stop_discovery(&mut self) {
        if self.discovery.take().is_some() && self.power_state == PowerState::PoweredOn {
            info!("Stopping discovery");
            self.radio.stop_scan();
        }
    }

    pub fn connect(&mut self, id: &DeviceIdentity) -> bool {
        match self.devices.get_mut(id) {
            Some(device) => device.connect(&self.radio),
            None => false,
        }
    }

    pub fn disconnect(&mut self, id: &DeviceIdentity) -> bool {
        match self.devices.get_mut(id) {
            Some(device) => device.disconnect(&self.radio),
            None => false,
        }
    }

    pub fn write_matrix(&mut self, id: &DeviceIdentity, request: WriteRequest) -> Option<WriteOutcome> {
        self.devices.get_mut(id)?.submit(&self.radio, request)
    }

    pub fn set_matrix_brightness(&mut self, id: &DeviceIdentity, brightness: f32) -> bool {
        match self.devices.get_mut(id) {
            Some(device) => {
                device.set_matrix_brightness(brightness);
                true
            },
            None => false,
        }
    }

    /// Invalidates and forgets a device. Returns false for unknown devices.
    pub fn invalidate_device(&mut self, id: &DeviceIdentity) -> bool {
        match self.devices.get_mut(id) {
            Some(device) => {
                device.invalidate(&self.radio);
                self.remove_invalidated();
                true
            },
            None => false,
        }
    }

    fn invalidate_all(&mut self) {
        for device in self.devices.values_mut() {
            device.invalidate(&self.radio);
        }
        self.remove_invalidated();
    }

    fn remove_invalidated(&mut self) {
        let invalidated: Vec<DeviceIdentity> = self.devices
            .iter()
            .filter(|(_, device)| device.state() == ConnectionState::Invalidated)
            .map(|(id, _)| id.clone())
            .collect();

        for id in invalidated {
            self.devices.shift_remove(&id);
            info!("{}: removed invalidated device", id);
            self.emit(CoordinatorEvent::Invalidated(id));
        }
    }

    pub fn handle_command(&mut self, command: CoordinatorCommand) {
        debug!("Command {:?}", command);

        match command {
            CoordinatorCommand::StartDiscovery { services, detect_unreachable } => {
                self.start_discovery(services, detect_unreachable);
            },
            CoordinatorCommand::StopDiscovery => self.stop_discovery(),
            CoordinatorCommand::Connect(id) => {
                if !self.connect(&id) {
                    warn!("{}: can not connect", id);
                }
            },
            CoordinatorCommand::Disconnect(id) => {
                if !self.disconnect(&id) {
                    warn!("{}: can not disconnect", id);
                }
            },
            CoordinatorCommand::WriteMatrix(id, request) => {
                if self.write_matrix(&id, request).is_none() {
                    warn!("{}: can not write matrix", id);
                }
            },
            CoordinatorCommand::SetMatrixBrightness(id, brightness) => {
                self.set_matrix_brightness(&id, brightness);
            },
            CoordinatorCommand::Invalidate(id) => {
                self.invalidate_device(&id);
            },
        }
    }

    pub fn handle_timer(&mut self, fired: TimerFired) {
        match self.devices.get_mut(&fired.device) {
            Some(device) => device.handle_timer(&self.radio, &fired),
            None => {
                debug!("{}: ignoring timer of removed device", fired.device);
                return;
            },
        }
        self.remove_invalidated();
    }

    /// Handles every timer that already fired, without waiting for more.
    pub fn process_elapsed_timers(&mut self) {
        while let Ok(Some(fired)) = self.timer_events.try_next() {
            self.handle_timer(fired);
        }
    }

    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PowerStateChanged(state) => self.did_update_power_state(state),
            RadioEvent::SessionRestored(ids) => {
                info!("Restored {} peripheral(s) from a previous session", ids.len());
                self.restored.extend(ids);
                if self.power_state == PowerState::PoweredOn {
                    self.replay_restored();
                }
            },
            RadioEvent::PeripheralDiscovered { id, advertisement } => {
                self.did_discover(id, &advertisement);
            },
            event => self.route(event),
        }
        self.remove_invalidated();
    }

    fn did_update_power_state(&mut self, state: PowerState) {
        let was_powered_on = self.power_state == PowerState::PoweredOn;
        self.power_state = state;
        info!("Radio power state: {:?}", state);

        if state != PowerState::PoweredOn {
            if !self.devices.is_empty() {
                warn!("Radio is no longer powered on, invalidating {} device(s)", self.devices.len());
            }
            self.invalidate_all();
            return;
        }

        if was_powered_on {
            return;
        }

        self.replay_restored();

        if let Some(request) = &self.discovery {
            info!("Resuming discovery (detect unreachable: {})", request.detect_unreachable);
            self.radio.start_scan(&request.services, request.detect_unreachable);
        }
    }

    fn replay_restored(&mut self) {
        for id in std::mem::take(&mut self.restored) {
            if self.devices.contains_key(&id) {
                continue;
            }

            let context = self.context(&id);
            let Some(mut device) = self.factory.create(context, None) else {
                debug!("{}: restored peripheral declined", id);
                continue;
            };

            self.emit(CoordinatorEvent::Restored(id.clone()));
            device.did_restore(&self.radio);
            self.devices.insert(id, device);
        }
    }

    fn did_discover(&mut self, id: DeviceIdentity, advertisement: &Advertisement) {
        let detect_unreachable = self.discovery.as_ref().map_or(false, |request| request.detect_unreachable);

        if let Some(device) = self.devices.get_mut(&id) {
            if detect_unreachable {
                device.did_advertise(advertisement, true);
            }
            return;
        }

        let context = self.context(&id);
        let Some(mut device) = self.factory.create(context, Some(advertisement)) else {
            return;
        };

        info!("{}: discovered {:?}", id, advertisement.local_name);
        self.emit(CoordinatorEvent::Discovered(id.clone()));
        device.did_advertise(advertisement, detect_unreachable);
        self.devices.insert(id, device);
    }

    fn route(&mut self, event: RadioEvent) {
        let Some(device) = event.peripheral().and_then(|id| self.devices.get_mut(id)) else {
            debug!("Ignoring event for unknown peripheral: {:?}", event);
            return;
        };
        let radio = &self.radio;

        match event {
            RadioEvent::Connected { .. } => device.did_connect(radio),
            RadioEvent::FailedToConnect { error, .. } => {
                device.did_fail_to_connect(radio, error.map(ConnectionError::Radio));
            },
            RadioEvent::Disconnected { error, .. } => {
                device.did_disconnect(error.map(ConnectionError::Radio));
                device.invalidate(radio);
            },
            RadioEvent::ServicesDiscovered { services, .. } => device.did_discover_services(radio, &services),
            RadioEvent::CharacteristicsDiscovered { service, characteristics, .. } => {
                device.did_discover_characteristics(radio, service, &characteristics);
            },
            RadioEvent::ValueUpdated { characteristic, value, .. } => device.did_update_value(&characteristic, &value),
            RadioEvent::WriteAcknowledged { characteristic, .. } => device.did_write_value(radio, &characteristic),
            RadioEvent::PeripheralDiscovered { .. }
            | RadioEvent::PowerStateChanged(_)
            | RadioEvent::SessionRestored(_) => {},
        }
    }

    /// Stops scanning and invalidates every device.
    pub fn shutdown(&mut self) {
        self.stop_discovery();
        self.invalidate_all();
    }

    /// Handles events until `cancel` is cancelled or the radio goes away, then shuts down.
    pub async fn run<E, C>(mut self, radio_events: E, commands: C, cancel: CancellationToken)
    where
        E: Stream<Item = RadioEvent> + Unpin,
        C: Stream<Item = CoordinatorCommand> + Unpin,
    {
        let mut radio_events = radio_events.fuse();
        let mut commands = commands.fuse();

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = radio_events.next() => {
                    match event {
                        Some(event) => {
                            debug!("Radio event {:?}", event);
                            self.handle_radio_event(event);
                        },
                        None => {
                            warn!("Radio event stream ended");
                            break 'mainloop;
                        },
                    }
                },
                Some(fired) = self.timer_events.next() => {
                    self.handle_timer(fired);
                },
                Some(command) = commands.next() => {
                    self.handle_command(command);
                },
            }
        }

        info!("Discovery coordinator is shutting down");
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::fake::FakeRadio;

    fn advertisement(name: &str) -> Advertisement {
        Advertisement {
            local_name: Some(name.to_string()),
            ..Advertisement::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_accessory_factory_matches_name() {
        let (timers, _timer_events) = TimerScheduler::new();
        let (events, _events) = unbounded();
        let context = DeviceContext { identity: DeviceIdentity::new("a"), timers, events };
        let mut factory = AccessoryFactory::default();

        assert!(factory.create(context.clone(), Some(&advertisement("Nuimo"))).is_some());
        assert!(factory.create(context.clone(), Some(&advertisement("Headphones"))).is_none());
        assert!(factory.create(context.clone(), Some(&Advertisement::default())).is_none());
        assert!(factory.create(context, None).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closure_factory() {
        let mut created = 0;
        let factory = |context: DeviceContext, _: Option<&Advertisement>| {
            created += 1;
            Some(DeviceConnection::accessory(context, ConnectionSettings::default()))
        };
        let (mut coordinator, _events) = DiscoveryCoordinator::new(FakeRadio::default(), factory);

        coordinator.handle_radio_event(RadioEvent::PeripheralDiscovered {
            id: DeviceIdentity::new("a"),
            advertisement: Advertisement::default(),
        });
        assert_eq!(coordinator.devices().count(), 1);
        drop(coordinator);
        assert_eq!(created, 1);
    }
}
