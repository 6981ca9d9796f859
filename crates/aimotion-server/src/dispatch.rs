//! Typed commands and their handlers.
//!
//! [`Command::from_parsed`] turns a recognised frame (plus its payload, for
//! `traj`) into a typed command; [`Dispatcher::execute`] runs it against the
//! drone and produces the reply text.

use std::sync::Arc;

use aimotion_hal::{PartitionWriter, SharedDrone};
use aimotion_middleware::{EventBus, Topic};
use aimotion_types::{AimError, Event, EventPayload, TrajectoryMode};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::install::{FlightSlots, install_trajectory};
use crate::protocol::{CommandKind, ParsedCommand};

pub const MIN_TAKEOFF_ALTITUDE_M: f32 = 0.1;
pub const MAX_TAKEOFF_ALTITUDE_M: f32 = 1.5;
pub const DEFAULT_TAKEOFF_ALTITUDE_M: f32 = 0.5;

const EVENT_SOURCE: &str = "aimotion-server::dispatch";

/// A command with typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Takeoff { altitude_m: f32 },
    Land,
    Trajectory { mode: TrajectoryMode, payload: Vec<u8> },
}

impl Command {
    /// # Errors
    ///
    /// - [`AimError::Argument`] – unparsable altitude or unknown trajectory
    ///   mode.
    /// - [`AimError::Protocol`] – a `traj` command without its payload.
    pub fn from_parsed(parsed: ParsedCommand, payload: Option<Vec<u8>>) -> Result<Self, AimError> {
        match parsed.kind {
            CommandKind::Takeoff => Ok(Command::Takeoff {
                altitude_m: parse_altitude(parsed.argument.as_deref())?,
            }),
            CommandKind::Land => Ok(Command::Land),
            CommandKind::Trajectory => {
                let mode = TrajectoryMode::parse(parsed.argument.as_deref().unwrap_or_default())?;
                let payload = payload.ok_or_else(|| {
                    AimError::Protocol("traj command arrived without a payload".to_string())
                })?;
                Ok(Command::Trajectory { mode, payload })
            }
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Takeoff { .. } => CommandKind::Takeoff,
            Command::Land => CommandKind::Land,
            Command::Trajectory { .. } => CommandKind::Trajectory,
        }
    }
}

/// Takeoff altitude from the raw argument.
///
/// A missing or out-of-range altitude falls back to
/// [`DEFAULT_TAKEOFF_ALTITUDE_M`].
///
/// # Errors
///
/// Returns [`AimError::Argument`] when the argument is not a number.
pub fn parse_altitude(raw: Option<&str>) -> Result<f32, AimError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_TAKEOFF_ALTITUDE_M);
    };
    let altitude: f32 = raw
        .trim()
        .parse()
        .map_err(|_| AimError::Argument(format!("takeoff altitude '{raw}' is not a number")))?;

    if (MIN_TAKEOFF_ALTITUDE_M..=MAX_TAKEOFF_ALTITUDE_M).contains(&altitude) {
        Ok(altitude)
    } else {
        warn!(
            requested = altitude,
            fallback = DEFAULT_TAKEOFF_ALTITUDE_M,
            "takeoff altitude out of range"
        );
        Ok(DEFAULT_TAKEOFF_ALTITUDE_M)
    }
}

/// Runs commands for one session.
///
/// Holds the flight slot state for as long as the session lives, so no other
/// session can move the active slot underneath it.
pub struct Dispatcher {
    drone_id: String,
    drone: SharedDrone,
    writer: Arc<PartitionWriter>,
    flight: OwnedMutexGuard<FlightSlots>,
    bus: Option<EventBus>,
}

impl Dispatcher {
    pub fn new(
        drone_id: impl Into<String>,
        drone: SharedDrone,
        writer: Arc<PartitionWriter>,
        flight: OwnedMutexGuard<FlightSlots>,
    ) -> Self {
        Self {
            drone_id: drone_id.into(),
            drone,
            writer,
            flight,
            bus: None,
        }
    }

    /// Publish flight events on `bus` (builder-style).
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn flight(&self) -> &FlightSlots {
        &self.flight
    }

    /// Run `command` and return the reply for the client.
    ///
    /// # Errors
    ///
    /// Any [`AimError`] from the drone or the install procedure.
    pub async fn execute(&mut self, command: Command) -> Result<String, AimError> {
        let result = self.run(command).await;
        if let Err(AimError::Device { details, .. }) = &result {
            self.publish(EventPayload::DroneFault {
                drone_id: self.drone_id.clone(),
                message: details.clone(),
            });
        }
        result
    }

    async fn run(&mut self, command: Command) -> Result<String, AimError> {
        let mut drone = self.drone.lock().await;
        match command {
            Command::Takeoff { altitude_m } => {
                drone.takeoff(altitude_m).await?;
                info!(drone = %self.drone_id, altitude_m, "takeoff");
                Ok(format!("Takeoff to {altitude_m} m started."))
            }
            Command::Land => {
                drone.land().await?;
                info!(drone = %self.drone_id, "land");
                Ok("Landing started.".to_string())
            }
            Command::Trajectory { mode, payload } => {
                let slot =
                    install_trajectory(&mut *drone, &self.writer, &mut self.flight, mode, &payload)
                        .await?;
                drop(drone);
                self.publish(EventPayload::TrajectoryActivated {
                    drone_id: self.drone_id.clone(),
                    slot,
                    mode,
                });
                Ok(format!("Trajectory started in slot {slot} ({mode})."))
            }
        }
    }

    fn publish(&self, payload: EventPayload) {
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(e) = bus.publish_to(Topic::FlightEvents, Event::new(EVENT_SOURCE, payload)) {
            debug!(error = %e, "flight event dropped");
        }
    }
}
