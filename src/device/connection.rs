use std::collections::HashMap;
use std::fmt;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, info, warn};
use tokio::time::Duration;
use uuid::Uuid;

use crate::codec::gatt::decode_notification;
use crate::codec::matrix::LedMatrix;
use crate::device::constants::{
    make_battery_service_uuid, make_battery_uuid, make_device_information_service_uuid,
    make_firmware_version_uuid, make_led_matrix_service_uuid, make_led_matrix_uuid,
    make_sensor_button_uuid, make_sensor_fly_uuid, make_sensor_rotation_uuid,
    make_sensor_service_uuid, make_sensor_touch_uuid, CONNECT_TIMEOUT,
    DEFAULT_MATRIX_DISPLAY_INTERVAL, MAX_ADVERTISING_INTERVAL,
};
use crate::device::timer::{is_current, TimerFired, TimerHandle, TimerKind, TimerScheduler};
use crate::device::types::{ConnectionState, DeviceEvent, DeviceIdentity, WriteOptions, WriteRequest};
use crate::device::write_flow::{WriteFlowController, WriteOutcome};
use crate::discovery::types::CoordinatorEvent;
use crate::error::ConnectionError;
use crate::radio::{Advertisement, HostRadio};

/// Turns a value notification into a device event, `None` for payloads that carry no event.
pub type NotificationDecoder = fn(&Uuid, &[u8]) -> Option<DeviceEvent>;

/// The GATT layout of a kind of device.
#[derive(Clone)]
pub struct Capabilities {
    /// Services to discover after connecting
    pub service_uuids: Vec<Uuid>,
    /// Characteristics to discover, per service
    pub characteristics: HashMap<Uuid, Vec<Uuid>>,
    /// Characteristics to subscribe to
    pub notify: Vec<Uuid>,
    /// Characteristics to read once when discovered
    pub read_on_discovery: Vec<Uuid>,
    /// The characteristic matrix commands are written to. A device that has one is only
    /// reported as connected once it has been discovered.
    pub display_characteristic: Option<Uuid>,
    pub decode: NotificationDecoder,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("service_uuids", &self.service_uuids)
            .field("characteristics", &self.characteristics)
            .field("notify", &self.notify)
            .field("read_on_discovery", &self.read_on_discovery)
            .field("display_characteristic", &self.display_characteristic)
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    /// The battery, device information, LED matrix and sensor services of the accessory.
    pub fn accessory() -> Self {
        let mut characteristics = HashMap::new();
        characteristics.insert(make_battery_service_uuid(), vec![make_battery_uuid()]);
        characteristics.insert(make_device_information_service_uuid(), vec![make_firmware_version_uuid()]);
        characteristics.insert(make_led_matrix_service_uuid(), vec![make_led_matrix_uuid()]);
        characteristics.insert(
            make_sensor_service_uuid(),
            vec![
                make_sensor_fly_uuid(),
                make_sensor_touch_uuid(),
                make_sensor_rotation_uuid(),
                make_sensor_button_uuid(),
            ],
        );

        Capabilities {
            service_uuids: vec![
                make_battery_service_uuid(),
                make_device_information_service_uuid(),
                make_led_matrix_service_uuid(),
                make_sensor_service_uuid(),
            ],
            characteristics,
            notify: vec![
                make_battery_uuid(),
                make_sensor_fly_uuid(),
                make_sensor_touch_uuid(),
                make_sensor_rotation_uuid(),
                make_sensor_button_uuid(),
            ],
            read_on_discovery: vec![make_firmware_version_uuid(), make_battery_uuid()],
            display_characteristic: Some(make_led_matrix_uuid()),
            decode: decode_notification,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub connection_timeout: Duration,
    /// `None` if the device does not advertise periodically; it is then never considered unreachable
    pub max_advertising_interval: Option<Duration>,
    pub reconnect_on_first_failure: bool,
    pub matrix_brightness: f32, // [0, 1]
    pub default_matrix_display_interval: f64, // seconds
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            connection_timeout: Duration::from_millis(CONNECT_TIMEOUT),
            max_advertising_interval: Some(Duration::from_millis(MAX_ADVERTISING_INTERVAL)),
            reconnect_on_first_failure: true,
            matrix_brightness: 1.0,
            default_matrix_display_interval: DEFAULT_MATRIX_DISPLAY_INTERVAL,
        }
    }
}

/// What a device needs from the coordinator that owns it.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub identity: DeviceIdentity,
    pub timers: TimerScheduler,
    pub events: UnboundedSender<CoordinatorEvent>,
}

/**
 * Connection lifecycle of one device.
 *
 * ```text
 * Disconnected --connect()--> Connecting --connected, display found--> Connected
 *      ^                          |                                       |
 *      +--failed / timed out------+         Disconnecting <--disconnect()--+
 *      +--disconnected-----------------------------+--------------------------+
 *
 * any state --invalidate()--> Invalidated (terminal)
 * ```
 *
 * All methods return immediately. Requests go out through the `HostRadio`, and the owner feeds
 * the outcomes back in through the `did_*` methods and `handle_timer`.
 */
#[derive(Debug)]
pub struct DeviceConnection {
    identity: DeviceIdentity,
    capabilities: Capabilities,
    settings: ConnectionSettings,
    timers: TimerScheduler,
    events: UnboundedSender<CoordinatorEvent>,

    state: ConnectionState,
    advertisement_timer: Option<TimerHandle>,
    connect_timer: Option<TimerHandle>,
    reconnect_on_failure: bool,
    writer: Option<WriteFlowController>,
}

impl DeviceConnection {
    pub fn new(context: DeviceContext, capabilities: Capabilities, settings: ConnectionSettings) -> Self {
        DeviceConnection {
            identity: context.identity,
            capabilities,
            settings,
            timers: context.timers,
            events: context.events,
            state: ConnectionState::Disconnected,
            advertisement_timer: None,
            connect_timer: None,
            reconnect_on_failure: false,
            writer: None,
        }
    }

    pub fn accessory(context: DeviceContext, settings: ConnectionSettings) -> Self {
        DeviceConnection::new(context, Capabilities::accessory(), settings)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// True once the display characteristic was found and until the device disconnects.
    pub fn can_write_matrix(&self) -> bool {
        self.writer.is_some()
    }

    pub fn set_matrix_brightness(&mut self, brightness: f32) {
        self.settings.matrix_brightness = brightness;
        if let Some(writer) = &mut self.writer {
            writer.set_brightness(brightness);
        }
    }

    pub fn set_default_matrix_display_interval(&mut self, seconds: f64) {
        self.settings.default_matrix_display_interval = seconds;
    }

    fn emit(&self, event: DeviceEvent) {
        let event = CoordinatorEvent::Device { id: self.identity.clone(), event };
        if self.events.unbounded_send(event).is_err() {
            debug!("{}: nobody is listening for device events", self.identity);
        }
    }

    fn set_state(&mut self, state: ConnectionState, error: Option<ConnectionError>) {
        if self.state == state {
            return;
        }

        match &error {
            Some(error) => info!("{}: {} -> {} ({})", self.identity, self.state, state, error),
            None => info!("{}: {} -> {}", self.identity, self.state, state),
        }

        self.state = state;
        self.emit(DeviceEvent::StateChanged { state, error });
    }

    /// Returns false unless the device is disconnected.
    pub fn connect<R: HostRadio + ?Sized>(&mut self, radio: &R) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }

        self.advertisement_timer = None;
        self.reconnect_on_failure = self.settings.reconnect_on_first_failure;
        self.set_state(ConnectionState::Connecting, None);
        self.request_connection(radio);
        true
    }

    fn request_connection<R: HostRadio + ?Sized>(&mut self, radio: &R) {
        radio.connect(&self.identity);
        self.connect_timer = Some(self.timers.schedule(
            &self.identity,
            TimerKind::ConnectTimeout,
            self.settings.connection_timeout,
        ));
    }

    /// Returns false unless the device is connected.
    pub fn disconnect<R: HostRadio + ?Sized>(&mut self, radio: &R) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }

        radio.cancel_connection(&self.identity);
        self.set_state(ConnectionState::Disconnecting, None);
        true
    }

    /// Invalidates the device for good. Does not wait for the radio to disconnect.
    pub fn invalidate<R: HostRadio + ?Sized>(&mut self, radio: &R) {
        if self.state == ConnectionState::Invalidated {
            return;
        }

        self.advertisement_timer = None;
        self.connect_timer = None;
        self.reconnect_on_failure = false;
        self.writer = None;

        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Disconnecting
        ) {
            radio.cancel_connection(&self.identity);
        }

        self.set_state(ConnectionState::Invalidated, None);
    }

    /// Writes a matrix, using the default display interval if `interval` is `None`.
    /// Returns `None` while the display characteristic is not available.
    pub fn write_matrix<R: HostRadio + ?Sized>(
        &mut self,
        radio: &R,
        matrix: LedMatrix,
        interval: Option<f64>,
        options: WriteOptions,
    ) -> Option<WriteOutcome> {
        let interval = interval.unwrap_or(self.settings.default_matrix_display_interval);
        self.submit(radio, WriteRequest::new(matrix, interval).with_options(options))
    }

    pub fn submit<R: HostRadio + ?Sized>(&mut self, radio: &R, request: WriteRequest) -> Option<WriteOutcome> {
        match &mut self.writer {
            Some(writer) => Some(writer.submit(radio, request)),
            None => {
                debug!("{}: can not write matrix, display is not available", self.identity);
                None
            },
        }
    }

    /// Every advertisement restarts the timer after which the device is considered out of range.
    pub fn did_advertise(&mut self, advertisement: &Advertisement, detect_unreachable: bool) {
        self.advertisement_timer = None;

        if !detect_unreachable || self.state != ConnectionState::Disconnected {
            return;
        }

        if let Some(interval) = self.settings.max_advertising_interval {
            debug!("{}: advertised (rssi {:?})", self.identity, advertisement.rssi);
            self.advertisement_timer = Some(self.timers.schedule(
                &self.identity,
                TimerKind::AdvertisementLiveness,
                interval,
            ));
        }
    }

    pub fn did_connect<R: HostRadio + ?Sized>(&mut self, radio: &R) {
        if self.state != ConnectionState::Connecting {
            debug!("{}: ignoring connect callback while {}", self.identity, self.state);
            return;
        }

        self.connect_timer = None;
        self.writer = None;
        info!("{}: connected; discovering services...", self.identity);
        radio.discover_services(&self.identity, &self.capabilities.service_uuids);

        if self.capabilities.display_characteristic.is_none() {
            self.set_state(ConnectionState::Connected, None);
        }
    }

    pub fn did_fail_to_connect<R: HostRadio + ?Sized>(&mut self, radio: &R, error: Option<ConnectionError>) {
        if self.state != ConnectionState::Connecting {
            debug!("{}: ignoring connect failure while {}", self.identity, self.state);
            return;
        }

        self.connect_timer = None;

        if self.reconnect_on_failure {
            self.reconnect_on_failure = false;
            match &error {
                Some(error) => warn!("{}: connecting failed ({}); retrying once", self.identity, error),
                None => warn!("{}: connecting failed; retrying once", self.identity),
            }
            self.request_connection(radio);
            return;
        }

        self.set_state(ConnectionState::Disconnected, error);
    }

    pub fn did_disconnect(&mut self, error: Option<ConnectionError>) {
        if self.state == ConnectionState::Invalidated {
            return;
        }

        self.connect_timer = None;
        self.reconnect_on_failure = false;
        self.writer = None;
        self.set_state(ConnectionState::Disconnected, error);
    }

    /// The peripheral is still connected from a previous session; only services need to be rediscovered.
    pub fn did_restore<R: HostRadio + ?Sized>(&mut self, radio: &R) {
        if self.state == ConnectionState::Invalidated {
            return;
        }

        self.advertisement_timer = None;
        self.connect_timer = None;
        self.writer = None;
        self.set_state(ConnectionState::Connecting, None);
        info!("{}: restored; discovering services...", self.identity);
        radio.discover_services(&self.identity, &self.capabilities.service_uuids);

        if self.capabilities.display_characteristic.is_none() {
            self.set_state(ConnectionState::Connected, None);
        }
    }

    fn is_linked(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn did_discover_services<R: HostRadio + ?Sized>(&mut self, radio: &R, services: &[Uuid]) {
        if !self.is_linked() {
            return;
        }

        for service in services {
            if let Some(characteristics) = self.capabilities.characteristics.get(service) {
                radio.discover_characteristics(&self.identity, *service, characteristics);
            }
        }
    }

    pub fn did_discover_characteristics<R: HostRadio + ?Sized>(&mut self, radio: &R, service: Uuid, characteristics: &[Uuid]) {
        if !self.is_linked() {
            return;
        }

        for characteristic in characteristics {
            if self.capabilities.notify.contains(characteristic) {
                info!("{}: subscribing to characteristic {:?} {:?}", self.identity, service, characteristic);
                radio.set_notify(&self.identity, *characteristic, true);
            }

            if self.capabilities.read_on_discovery.contains(characteristic) {
                radio.read_value(&self.identity, *characteristic);
            }

            if self.capabilities.display_characteristic == Some(*characteristic) {
                self.writer = Some(WriteFlowController::new(
                    self.identity.clone(),
                    *characteristic,
                    self.settings.matrix_brightness,
                    self.timers.clone(),
                ));

                if self.state == ConnectionState::Connecting {
                    info!("{}: peripheral ready", self.identity);
                    self.set_state(ConnectionState::Connected, None);
                }
            }
        }
    }

    pub fn did_update_value(&mut self, characteristic: &Uuid, value: &[u8]) {
        if !self.is_linked() {
            return;
        }

        if let Some(event) = (self.capabilities.decode)(characteristic, value) {
            self.emit(event);
        }
    }

    pub fn did_write_value<R: HostRadio + ?Sized>(&mut self, radio: &R, characteristic: &Uuid) {
        if self.capabilities.display_characteristic.as_ref() != Some(characteristic) {
            return;
        }

        let displayed = match &mut self.writer {
            Some(writer) => writer.on_write_acknowledged(radio),
            None => false,
        };

        // duplicate or late acknowledgements are not reported
        if displayed {
            self.emit(DeviceEvent::MatrixDisplayed);
        }
    }

    pub fn handle_timer<R: HostRadio + ?Sized>(&mut self, radio: &R, fired: &TimerFired) {
        match fired.kind {
            TimerKind::AdvertisementLiveness => {
                if is_current(&self.advertisement_timer, fired) {
                    self.advertisement_timer = None;
                    info!("{}: stopped advertising, assuming it is out of range", self.identity);
                    self.invalidate(radio);
                }
            },
            TimerKind::ConnectTimeout => {
                if is_current(&self.connect_timer, fired) {
                    self.connect_timer = None;
                    warn!("{}: connecting took too long", self.identity);
                    // the host radio does not report timed out connection attempts by itself
                    radio.cancel_connection(&self.identity);
                    self.did_fail_to_connect(radio, Some(ConnectionError::Timeout));
                }
            },
            TimerKind::WriteResponse => {
                if let Some(writer) = &mut self.writer {
                    writer.handle_timer(radio, fired);
                }
            },
        }
    }
}
