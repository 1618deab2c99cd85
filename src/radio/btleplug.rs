//! [`HostRadio`] on top of btleplug.
//!
//! btleplug is async, so every request is performed on a spawned task which reports its outcome
//! as a [`RadioEvent`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::types::DeviceIdentity;
use crate::error::DeviceError;
use crate::radio::{Advertisement, HostRadio, PowerState, RadioEvent};

fn identity_of(id: &PeripheralId) -> DeviceIdentity {
    DeviceIdentity::new(format!("{:?}", id))
}

fn power_state_of(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::PoweredOn,
        CentralState::PoweredOff => PowerState::PoweredOff,
        _ => PowerState::Unknown,
    }
}

fn advertisement_of(properties: PeripheralProperties) -> Advertisement {
    Advertisement {
        local_name: properties.local_name,
        service_uuids: properties.services,
        rssi: properties.rssi,
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .ok_or(DeviceError::MissingCharacteristic)
}

/// A connection attempt, or the notification task of an established connection.
#[derive(Debug, Clone)]
struct Link {
    generation: u64,
    cancel: CancellationToken,
}

/// The live link of every peripheral. A peripheral has at most one link, opening a new one
/// cancels the link it replaces.
#[derive(Debug, Default)]
struct Links {
    generation: u64,
    links: HashMap<DeviceIdentity, Link>,
}

impl Links {
    fn open(&mut self, id: &DeviceIdentity, parent: &CancellationToken) -> Link {
        self.generation += 1;
        let link = Link { generation: self.generation, cancel: parent.child_token() };
        if let Some(previous) = self.links.insert(id.clone(), link.clone()) {
            previous.cancel.cancel();
        }
        link
    }

    /// Removes and cancels the link of `id`.
    fn close(&mut self, id: &DeviceIdentity) -> Option<Link> {
        let link = self.links.remove(id)?;
        link.cancel.cancel();
        Some(link)
    }

    /// Removes the link of `id` if it is still `link`. A newer link is left alone.
    fn release(&mut self, id: &DeviceIdentity, link: &Link) -> bool {
        match self.links.get(id) {
            Some(current) if current.generation == link.generation => {
                self.links.remove(id);
                true
            },
            _ => false,
        }
    }

    fn contains(&self, id: &DeviceIdentity) -> bool {
        self.links.contains_key(id)
    }
}

#[derive(Debug, Default)]
struct RadioState {
    power_state: Option<PowerState>,
    peripherals: HashMap<DeviceIdentity, Peripheral>,
    links: Links,
}

#[derive(Debug, Clone)]
pub struct BtleplugRadio {
    adapter: Adapter,
    sender: UnboundedSender<RadioEvent>,
    state: Arc<Mutex<RadioState>>,
    cancel: CancellationToken,
}

impl BtleplugRadio {
    /// Opens the first bluetooth adapter. Peripherals that are still connected and expose one of
    /// `restore_services` are reported through `RadioEvent::SessionRestored`.
    ///
    /// Background tasks stop when `cancel` is cancelled.
    pub async fn new(cancel: CancellationToken, restore_services: &[Uuid]) -> Result<(Self, UnboundedReceiver<RadioEvent>), DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let (sender, receiver) = unbounded::<RadioEvent>();
        let radio = BtleplugRadio {
            adapter,
            sender,
            state: Arc::new(Mutex::new(RadioState::default())),
            cancel,
        };

        let central_events = radio.adapter.events().await?;
        radio.spawn_central_events_task(central_events);

        let power_state = match radio.adapter.adapter_state().await {
            Ok(state) => power_state_of(state),
            Err(err) => {
                warn!("Failed to query adapter state: {}", err);
                PowerState::Unknown
            },
        };

        let restored = radio.find_restorable_peripherals(restore_services).await;
        if !restored.is_empty() {
            radio.send(RadioEvent::SessionRestored(restored));
        }

        radio.update_power_state(power_state);

        Ok((radio, receiver))
    }

    fn state(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().expect("Failed to lock radio state")
    }

    fn send(&self, event: RadioEvent) {
        if self.sender.unbounded_send(event).is_err() {
            debug!("Radio event dropped, receiver is gone");
        }
    }

    fn update_power_state(&self, power_state: PowerState) {
        let previous = self.state().power_state.replace(power_state);
        if previous != Some(power_state) {
            self.send(RadioEvent::PowerStateChanged(power_state));
        }
    }

    async fn find_restorable_peripherals(&self, services: &[Uuid]) -> Vec<DeviceIdentity> {
        let peripherals = match self.adapter.peripherals().await {
            Ok(peripherals) => peripherals,
            Err(err) => {
                warn!("Failed to query adapter for peripherals: {}", err);
                return Vec::new();
            },
        };

        let mut restored = Vec::new();
        for peripheral in peripherals {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }

            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                _ => continue,
            };

            if !properties.services.iter().any(|service| services.contains(service)) {
                continue;
            }

            let id = identity_of(&peripheral.id());
            info!("{}: still connected from a previous session", id);
            let link = self.state().links.open(&id, &self.cancel);
            self.spawn_notifications_task(&id, &peripheral, link);
            self.state().peripherals.insert(id.clone(), peripheral);
            restored.push(id);
        }

        restored
    }

    fn spawn_central_events_task(&self, mut events: impl futures::Stream<Item = CentralEvent> + Send + Unpin + 'static) {
        let radio = self.clone();

        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = radio.cancel.cancelled() => {
                        break 'mainloop;
                    },
                    event = events.next() => match event {
                        Some(event) => radio.handle_central_event(event).await,
                        None => {
                            warn!("Adapter event stream ended");
                            break 'mainloop;
                        },
                    },
                }
            }
        });
    }

    async fn handle_central_event(&self, event: CentralEvent) {
        match event {
            // btleplug keeps known peripherals around and only reports them as updated, so updates
            // must reach the coordinator to rediscover devices it has forgotten
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => self.report_advertisement(&id).await,
            CentralEvent::DeviceDisconnected(id) => {
                let id = identity_of(&id);
                let link = self.state().links.close(&id);
                if link.is_some() {
                    self.send(RadioEvent::Disconnected { id, error: None });
                }
            },
            CentralEvent::StateUpdate(state) => self.update_power_state(power_state_of(state)),
            _ => {},
        }
    }

    async fn report_advertisement(&self, peripheral_id: &PeripheralId) {
        let id = identity_of(peripheral_id);

        let peripheral = match self.adapter.peripheral(peripheral_id).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                debug!("{}: peripheral vanished: {}", id, err);
                return;
            },
        };

        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return,
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                return;
            },
        };

        self.state().peripherals.insert(id.clone(), peripheral);

        self.send(RadioEvent::PeripheralDiscovered { id, advertisement: advertisement_of(properties) });
    }

    fn peripheral(&self, id: &DeviceIdentity) -> Option<Peripheral> {
        let peripheral = self.state().peripherals.get(id).cloned();
        if peripheral.is_none() {
            warn!("{}", DeviceError::UnknownPeripheral(id.to_string()));
        }
        peripheral
    }

    fn spawn_notifications_task(&self, id: &DeviceIdentity, peripheral: &Peripheral, link: Link) {
        let radio = self.clone();
        let id = id.clone();
        let peripheral = peripheral.clone();
        let cancel = link.cancel;

        spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(notifications) => notifications,
                Err(err) => {
                    warn!("{}: could not get notification stream: {}", id, err);
                    return;
                },
            };

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    Some(data) = notifications.next() => {
                        radio.send(RadioEvent::ValueUpdated {
                            id: id.clone(),
                            characteristic: data.uuid,
                            value: data.value,
                        });
                    },
                }
            }
        });
    }
}

impl HostRadio for BtleplugRadio {
    fn power_state(&self) -> PowerState {
        self.state().power_state.unwrap_or(PowerState::Unknown)
    }

    /// btleplug has no control over duplicate filtering, every advertisement is reported whatever
    /// `allow_duplicates` says.
    fn start_scan(&self, services: &[Uuid], _allow_duplicates: bool) {
        let adapter = self.adapter.clone();
        let filter = ScanFilter { services: services.to_vec() };
        spawn(async move {
            if let Err(err) = adapter.start_scan(filter).await {
                warn!("Scanning failed: {:?}", err);
            }
        });
    }

    fn stop_scan(&self) {
        let adapter = self.adapter.clone();
        spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {:?}", err);
            }
        });
    }

    fn connect(&self, id: &DeviceIdentity) {
        let Some(peripheral) = self.peripheral(id) else {
            self.send(RadioEvent::FailedToConnect { id: id.clone(), error: Some("unknown peripheral".to_string()) });
            return;
        };

        let link = self.state().links.open(id, &self.cancel);

        let radio = self.clone();
        let id = id.clone();
        spawn(async move {
            info!("{}: connecting to peripheral...", id);
            let result = tokio::select! {
                _ = link.cancel.cancelled() => {
                    debug!("{}: connection attempt cancelled", id);
                    if let Err(err) = peripheral.disconnect().await {
                        debug!("{}: disconnecting cancelled attempt failed: {}", id, err);
                    }
                    return;
                },
                result = peripheral.connect() => result,
            };

            match result {
                Ok(()) if link.cancel.is_cancelled() => {
                    debug!("{}: connected after the attempt was cancelled", id);
                    if let Err(err) = peripheral.disconnect().await {
                        debug!("{}: disconnecting cancelled attempt failed: {}", id, err);
                    }
                },
                Ok(()) => {
                    radio.spawn_notifications_task(&id, &peripheral, link);
                    radio.send(RadioEvent::Connected { id });
                },
                Err(err) => {
                    warn!("{}: connecting to peripheral failed: {:?}", id, err);
                    radio.state().links.release(&id, &link);
                    radio.send(RadioEvent::FailedToConnect { id, error: Some(err.to_string()) });
                },
            }
        });
    }

    fn cancel_connection(&self, id: &DeviceIdentity) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        // closed right away, a retry may open the next link before the task below runs
        if self.state().links.close(id).is_none() {
            debug!("{}: no connection to cancel", id);
            return;
        }

        let id = id.clone();
        let radio = self.clone();
        spawn(async move {
            if !peripheral.is_connected().await.unwrap_or(false) {
                return;
            }

            if let Err(err) = peripheral.disconnect().await {
                warn!("{}: failed to disconnect: {:?}", id, err);
            }

            // some platforms do not report DeviceDisconnected for a local disconnect
            if !radio.state().links.contains(&id) {
                radio.send(RadioEvent::Disconnected { id, error: None });
            }
        });
    }

    fn discover_services(&self, id: &DeviceIdentity, filter: &[Uuid]) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        let radio = self.clone();
        let id = id.clone();
        let filter = filter.to_vec();
        spawn(async move {
            if let Err(err) = peripheral.discover_services().await {
                warn!("{}: service discovery failed: {:?}", id, err);
                return;
            }

            let services = peripheral.services()
                .into_iter()
                .map(|service| service.uuid)
                .filter(|uuid| filter.is_empty() || filter.contains(uuid))
                .collect();

            radio.send(RadioEvent::ServicesDiscovered { id, services });
        });
    }

    fn discover_characteristics(&self, id: &DeviceIdentity, service: Uuid, filter: &[Uuid]) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        // btleplug discovers characteristics together with their services
        let characteristics = peripheral.services()
            .into_iter()
            .filter(|candidate| candidate.uuid == service)
            .flat_map(|candidate| candidate.characteristics)
            .map(|characteristic| characteristic.uuid)
            .filter(|uuid| filter.is_empty() || filter.contains(uuid))
            .collect();

        self.send(RadioEvent::CharacteristicsDiscovered { id: id.clone(), service, characteristics });
    }

    fn set_notify(&self, id: &DeviceIdentity, characteristic: Uuid, enabled: bool) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        let id = id.clone();
        spawn(async move {
            let result = async {
                let characteristic = find_characteristic(&peripheral, characteristic)?;
                if enabled {
                    peripheral.subscribe(&characteristic).await?;
                } else {
                    peripheral.unsubscribe(&characteristic).await?;
                }
                Ok::<(), DeviceError>(())
            }.await;

            if let Err(err) = result {
                warn!("{}: failed to change notifications of {}: {}", id, characteristic, err);
            }
        });
    }

    fn write_value(&self, id: &DeviceIdentity, characteristic: Uuid, value: &[u8], with_response: bool) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        let radio = self.clone();
        let id = id.clone();
        let value = value.to_vec();
        spawn(async move {
            let write_type = if with_response { WriteType::WithResponse } else { WriteType::WithoutResponse };
            let result = async {
                let target = find_characteristic(&peripheral, characteristic)?;
                peripheral.write(&target, &value, write_type).await?;
                Ok::<(), DeviceError>(())
            }.await;

            match result {
                Ok(()) if with_response => radio.send(RadioEvent::WriteAcknowledged { id, characteristic }),
                Ok(()) => {},
                Err(err) => warn!("{}: failed to write to {}: {}", id, characteristic, err),
            }
        });
    }

    fn read_value(&self, id: &DeviceIdentity, characteristic: Uuid) {
        let Some(peripheral) = self.peripheral(id) else {
            return;
        };

        let radio = self.clone();
        let id = id.clone();
        spawn(async move {
            let result = async {
                let target = find_characteristic(&peripheral, characteristic)?;
                Ok::<Vec<u8>, DeviceError>(peripheral.read(&target).await?)
            }.await;

            match result {
                Ok(value) => radio.send(RadioEvent::ValueUpdated { id, characteristic, value }),
                Err(err) => warn!("{}: failed to read {}: {}", id, characteristic, err),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_a_link_cancels_the_previous_one() {
        let parent = CancellationToken::new();
        let mut links = Links::default();
        let id = DeviceIdentity::new("a");

        let first = links.open(&id, &parent);
        let second = links.open(&id, &parent);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        let other = links.open(&DeviceIdentity::new("b"), &parent);
        assert!(!second.cancel.is_cancelled());

        parent.cancel();
        assert!(second.cancel.is_cancelled());
        assert!(other.cancel.is_cancelled());
    }

    #[test]
    fn test_retry_link_survives_cancelled_attempt() {
        let parent = CancellationToken::new();
        let mut links = Links::default();
        let id = DeviceIdentity::new("a");

        // a timed out attempt is cancelled and retried before its task gets to clean up
        let attempt = links.open(&id, &parent);
        let closed = links.close(&id).unwrap();
        assert_eq!(closed.generation, attempt.generation);
        assert!(attempt.cancel.is_cancelled());
        let retry = links.open(&id, &parent);

        assert!(!links.release(&id, &attempt));
        assert!(links.contains(&id));
        assert!(!retry.cancel.is_cancelled());

        // the retry times out too and must still be cancellable
        let closed = links.close(&id).unwrap();
        assert_eq!(closed.generation, retry.generation);
        assert!(retry.cancel.is_cancelled());
        assert!(!links.contains(&id));
        assert!(links.close(&id).is_none());
    }

    #[test]
    fn test_failed_attempt_releases_its_link() {
        let parent = CancellationToken::new();
        let mut links = Links::default();
        let id = DeviceIdentity::new("a");

        let attempt = links.open(&id, &parent);
        assert!(links.release(&id, &attempt));
        assert!(!links.contains(&id));
        assert!(!links.release(&id, &attempt));
        assert!(!attempt.cancel.is_cancelled());
    }

    #[test]
    fn test_advertisement_of_properties() {
        let properties = PeripheralProperties {
            local_name: Some("Nuimo".to_string()),
            services: vec![Uuid::from_u128(0x180f)],
            rssi: Some(-55),
            ..Default::default()
        };

        assert_eq!(
            advertisement_of(properties),
            Advertisement {
                local_name: Some("Nuimo".to_string()),
                service_uuids: vec![Uuid::from_u128(0x180f)],
                rssi: Some(-55),
            }
        );
    }
}
