//! Generic `Drone` and `TrajectoryMemory` traits for flying robots driven
//! over a radio link.
//!
//! Drivers implement these traits and register themselves with a
//! [`DroneRegistry`][crate::registry::DroneRegistry].  The protocol server
//! only ever talks to the traits, so a real radio driver and the
//! [`SimDrone`][crate::sim::SimDrone] are interchangeable.

use std::sync::Arc;

use aimotion_types::{AimError, SlotId, TrajectoryMode};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// A drone handle shared between tasks.
///
/// The mutex serializes every memory and motion command sent to one drone,
/// so a multi-step sequence (write, define, start) is never interleaved with
/// another caller's commands.
pub type SharedDrone = Arc<Mutex<dyn Drone>>;

/// Who is currently in charge of the drone's motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    /// Motors off, nothing scheduled.
    Idle,
    /// Flying under supervised show control.
    Show,
    /// Flown by a pilot or another external controller.
    Manual,
}

/// Snapshot of the drone's flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroneStatus {
    pub mode: FlightMode,
    pub airborne: bool,
}

impl DroneStatus {
    /// `true` when trajectories may be swapped in mid-flight.
    pub fn accepts_trajectories(&self) -> bool {
        self.mode == FlightMode::Show && self.airborne
    }
}

/// Raw byte access to the drone's trajectory memory.
#[async_trait]
pub trait TrajectoryMemory: Send + Sync {
    /// Total addressable size in bytes.
    fn size(&self) -> usize;

    /// Read `len` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Device`] when the range is out of bounds or the
    /// link fails.
    async fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>, AimError>;

    /// Write `data` starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Device`] when the range is out of bounds or the
    /// link fails.
    async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), AimError>;
}

/// A single flying robot.
#[async_trait]
pub trait Drone: Send + Sync {
    /// Stable identifier for this drone, e.g. `"04"`.
    fn id(&self) -> &str;

    async fn status(&mut self) -> Result<DroneStatus, AimError>;

    /// Take off and hover at `altitude_m` metres.
    async fn takeoff(&mut self, altitude_m: f32) -> Result<(), AimError>;

    async fn land(&mut self) -> Result<(), AimError>;

    /// Declare that `slot` holds `piece_count` poly4d pieces starting at
    /// `address` in trajectory memory.
    async fn define_trajectory(
        &mut self,
        slot: SlotId,
        address: u32,
        piece_count: u8,
    ) -> Result<(), AimError>;

    /// Start flying the trajectory previously defined in `slot`.
    async fn start_trajectory(&mut self, slot: SlotId, mode: TrajectoryMode)
    -> Result<(), AimError>;

    /// The drone's trajectory memory.
    fn memory(&mut self) -> &mut dyn TrajectoryMemory;
}
