use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Cause of a failed or lost connection, reported along with the connection state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Bluetooth radio reported: {0}")]
    Radio(String),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {0} is not known to the bluetooth adapter")]
    UnknownPeripheral(String),

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GestureParseError {
    #[error("Unknown gesture identifier: {0}")]
    InvalidIdentifier(String),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to run (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to run (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Unknown matrix name: {0}")]
    UnknownMatrix(String),

    #[error("Failed to wait for shutdown signal: {source}")]
    Signal { source: io::Error },
}
