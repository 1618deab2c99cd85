use std::path::PathBuf;
use clap::Parser;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::codec::matrix::{LedMatrix, MATRIX_NAMES};
use crate::config::io::ConfigIO;
use crate::device::types::{ConnectionState, DeviceEvent, WriteRequest};
use crate::discovery::coordinator::{AccessoryFactory, DiscoveryCoordinator};
use crate::discovery::types::{CoordinatorCommand, CoordinatorEvent};
use crate::error::AppRunError;
use crate::radio::btleplug::BtleplugRadio;

/// Finds Nuimo controllers and logs their gestures.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "nuimo-link", version)]
pub struct Cli {
    /// Forget accessories that stop advertising
    #[arg(long)]
    pub detect_unreachable: bool,

    /// Path to the JSON configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Connect to every accessory that is found
    #[arg(long)]
    pub connect: bool,

    /// Show a predefined matrix once an accessory is connected
    #[arg(long, value_name = "NAME")]
    pub matrix: Option<String>,
}

fn parse_matrix(name: &Option<String>) -> Result<Option<LedMatrix>, AppRunError> {
    match name {
        None => Ok(None),
        Some(name) => match LedMatrix::named(name) {
            Some(matrix) => Ok(Some(matrix)),
            None => {
                warn!("Known matrices: {}", MATRIX_NAMES.join(", "));
                Err(AppRunError::UnknownMatrix(name.clone()))
            },
        },
    }
}

struct EventHandler {
    commands: UnboundedSender<CoordinatorCommand>,
    connect: bool,
    matrix: Option<LedMatrix>,
    display_interval: f64,
}

impl EventHandler {
    fn send(&self, command: CoordinatorCommand) {
        if self.commands.unbounded_send(command).is_err() {
            debug!("Coordinator is gone, dropping command");
        }
    }

    fn handle(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Discovered(id) => {
                info!("{}: found", id);
                if self.connect {
                    self.send(CoordinatorCommand::Connect(id));
                }
            },
            CoordinatorEvent::Restored(id) => info!("{}: restored", id),
            CoordinatorEvent::Invalidated(id) => info!("{}: gone", id),
            CoordinatorEvent::Device { id, event } => match event {
                DeviceEvent::StateChanged { state, error } => {
                    match error {
                        Some(error) => warn!("{}: {} ({})", id, state, error),
                        None => info!("{}: {}", id, state),
                    }

                    if state == ConnectionState::Connected {
                        if let Some(matrix) = &self.matrix {
                            let request = WriteRequest::new(matrix.clone(), self.display_interval);
                            self.send(CoordinatorCommand::WriteMatrix(id, request));
                        }
                    }
                },
                DeviceEvent::FirmwareVersion(version) => info!("{}: firmware {}", id, version),
                DeviceEvent::BatteryLevel(level) => info!("{}: battery {}%", id, level),
                DeviceEvent::Gesture(gesture) => info!("{}: {}", id, gesture),
                DeviceEvent::MatrixDisplayed => debug!("{}: matrix displayed", id),
            },
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), AppRunError> {
    let matrix = parse_matrix(&cli.matrix)?;

    let mut config_io = ConfigIO::new_sync(cli.config.as_deref())?;
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let config = match config_io.read_or_init().await {
        Ok(config) => config,
        Err(err) if err.is_file_not_found_error() => Default::default(),
        Err(err) => return Err(err.into()),
    };

    let detect_unreachable = cli.detect_unreachable || config.detect_unreachable;
    let services = config.service_uuids();
    let cancel = CancellationToken::new();

    let (radio, radio_events) = BtleplugRadio::new(cancel.child_token(), &services).await?;
    let factory = AccessoryFactory {
        name: config.device_name.clone(),
        settings: config.connection_settings(),
    };
    let (coordinator, mut events) = DiscoveryCoordinator::new(radio, factory);
    let (commands, command_receiver) = unbounded::<CoordinatorCommand>();

    let handler = EventHandler {
        commands,
        connect: cli.connect,
        matrix,
        display_interval: config.default_matrix_display_interval,
    };
    handler.send(CoordinatorCommand::StartDiscovery { services, detect_unreachable });

    let coordinator_task = spawn(coordinator.run(radio_events, command_receiver, cancel.child_token()));
    let mut result = Ok(());

    'mainloop: loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(source) = signal {
                    result = Err(AppRunError::Signal { source });
                }
                info!("Shutting down");
                break 'mainloop;
            },
            event = events.next() => match event {
                Some(event) => handler.handle(event),
                None => break 'mainloop,
            },
        }
    }

    cancel.cancel();
    if let Err(err) = coordinator_task.await {
        warn!("Discovery coordinator task failed: {:?}", err);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::DeviceIdentity;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["nuimo-link", "--detect-unreachable", "--connect", "--matrix", "play"]);
        assert!(cli.detect_unreachable);
        assert!(cli.connect);
        assert_eq!(cli.matrix.as_deref(), Some("play"));
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_unknown_matrix() {
        assert!(matches!(parse_matrix(&Some("smiley".to_string())), Err(AppRunError::UnknownMatrix(_))));
        assert!(parse_matrix(&Some("pause".to_string())).unwrap().is_some());
        assert!(parse_matrix(&None).unwrap().is_none());
    }

    #[test]
    fn test_handler_connects_and_shows_matrix() {
        let (commands, mut receiver) = unbounded();
        let handler = EventHandler {
            commands,
            connect: true,
            matrix: LedMatrix::named("play"),
            display_interval: 2.0,
        };
        let id = DeviceIdentity::new("a");

        handler.handle(CoordinatorEvent::Discovered(id.clone()));
        handler.handle(CoordinatorEvent::Device {
            id: id.clone(),
            event: DeviceEvent::StateChanged { state: ConnectionState::Connected, error: None },
        });

        assert_eq!(receiver.try_next().unwrap(), Some(CoordinatorCommand::Connect(id.clone())));
        assert_eq!(
            receiver.try_next().unwrap(),
            Some(CoordinatorCommand::WriteMatrix(id, WriteRequest::new(LedMatrix::named("play").unwrap(), 2.0)))
        );
    }
}
