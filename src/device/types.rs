use std::fmt;
use std::ops::BitOr;

use crate::codec::gesture::GestureEvent;
use crate::codec::matrix::LedMatrix;
use crate::error::ConnectionError;

/// Stable key of a physical accessory, derived from the peripheral identifier of the host radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        DeviceIdentity(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(value: &str) -> Self {
        DeviceIdentity::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Invalidated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Invalidated => "invalidated",
        };

        write!(f, "{}", result)
    }
}

/// Events a single device reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    StateChanged {
        state: ConnectionState,
        error: Option<ConnectionError>,
    },
    FirmwareVersion(String),
    BatteryLevel(u8), // [0, 100]
    Gesture(GestureEvent),
    MatrixDisplayed,
}

/// Options for a matrix write, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions(u8);

impl WriteOptions {
    pub const NONE: WriteOptions = WriteOptions(0);
    pub const IGNORE_DUPLICATES: WriteOptions = WriteOptions(1);
    pub const WITH_FADE_TRANSITION: WriteOptions = WriteOptions(2);
    pub const WITHOUT_WRITE_RESPONSE: WriteOptions = WriteOptions(4);

    pub fn from_bits(bits: u8) -> Self {
        WriteOptions(bits & 0b111)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: WriteOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WriteOptions {
    type Output = WriteOptions;

    fn bitor(self, rhs: WriteOptions) -> WriteOptions {
        WriteOptions(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub matrix: LedMatrix,
    pub display_interval_seconds: f64,
    pub options: WriteOptions,
}

impl WriteRequest {
    pub fn new(matrix: LedMatrix, display_interval_seconds: f64) -> Self {
        WriteRequest {
            matrix,
            display_interval_seconds,
            options: WriteOptions::NONE,
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_response(&self) -> bool {
        !self.options.contains(WriteOptions::WITHOUT_WRITE_RESPONSE)
    }
}
