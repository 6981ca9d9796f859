//! In-process simulated drivers for tests and for running the stack without
//! a radio.
//!
//! [`SimDrone`] keeps a byte-addressable trajectory memory and records every
//! motion command so tests can assert on the exact sequence the protocol
//! produced.  [`SimBroadcaster`] records broadcast packets.
//!
//! # Example
//!
//! ```rust
//! use aimotion_hal::sim::SimDrone;
//!
//! let drone = SimDrone::new("04").airborne_in_show();
//! assert!(drone.current_status().accepts_trajectories());
//! ```

use std::sync::Mutex as StdMutex;

use aimotion_types::{AimError, SlotId, TrajectoryMode};
use async_trait::async_trait;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::drone::{Drone, DroneStatus, FlightMode, TrajectoryMemory};
use crate::poly4d::PIECE_SIZE;

/// Trajectory memory size of the simulated drone, in bytes.
pub const SIM_MEMORY_SIZE: usize = 4096;

// ────────────────────────────────────────────────────────────────────────────
// Simulated memory
// ────────────────────────────────────────────────────────────────────────────

/// Zero-initialised byte memory that counts write operations.
pub struct SimMemory {
    bytes: Vec<u8>,
    writes: usize,
}

impl SimMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
            writes: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of write calls received so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, AimError> {
        let start = address as usize;
        let end = start.checked_add(len).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => Ok(start..end),
            None => Err(AimError::device(
                "sim memory",
                format!(
                    "access of {len} bytes at {address} exceeds {} bytes",
                    self.bytes.len()
                ),
            )),
        }
    }
}

#[async_trait]
impl TrajectoryMemory for SimMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    async fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>, AimError> {
        let range = self.range(address, len)?;
        Ok(self.bytes[range].to_vec())
    }

    async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), AimError> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated drone
// ────────────────────────────────────────────────────────────────────────────

/// A command the simulated drone received.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Takeoff(f32),
    Land,
    Define {
        slot: SlotId,
        address: u32,
        piece_count: u8,
    },
    Start {
        slot: SlotId,
        mode: TrajectoryMode,
    },
}

/// A simulated drone.  Every command succeeds unless a failure was injected.
pub struct SimDrone {
    id: String,
    status: DroneStatus,
    memory: SimMemory,
    defined: Vec<SlotId>,
    commands: Vec<SimCommand>,
    fail_start_on: Option<SlotId>,
}

impl SimDrone {
    /// A grounded, idle drone with [`SIM_MEMORY_SIZE`] bytes of memory.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: DroneStatus {
                mode: FlightMode::Idle,
                airborne: false,
            },
            memory: SimMemory::new(SIM_MEMORY_SIZE),
            defined: Vec::new(),
            commands: Vec::new(),
            fail_start_on: None,
        }
    }

    /// Builder: the drone is already flying under show control.
    pub fn airborne_in_show(mut self) -> Self {
        self.status = DroneStatus {
            mode: FlightMode::Show,
            airborne: true,
        };
        self
    }

    /// Builder: reject `start_trajectory` for `slot`.  Other slots still
    /// start normally.
    pub fn failing_start_on(mut self, slot: SlotId) -> Self {
        self.fail_start_on = Some(slot);
        self
    }

    pub fn set_status(&mut self, status: DroneStatus) {
        self.status = status;
    }

    pub fn current_status(&self) -> DroneStatus {
        self.status
    }

    /// Every command received, oldest first.
    pub fn commands(&self) -> &[SimCommand] {
        &self.commands
    }

    pub fn sim_memory(&self) -> &SimMemory {
        &self.memory
    }
}

#[async_trait]
impl Drone for SimDrone {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&mut self) -> Result<DroneStatus, AimError> {
        Ok(self.status)
    }

    async fn takeoff(&mut self, altitude_m: f32) -> Result<(), AimError> {
        debug!(drone = %self.id, altitude_m, "sim takeoff");
        self.commands.push(SimCommand::Takeoff(altitude_m));
        self.status = DroneStatus {
            mode: FlightMode::Show,
            airborne: true,
        };
        Ok(())
    }

    async fn land(&mut self) -> Result<(), AimError> {
        debug!(drone = %self.id, "sim land");
        self.commands.push(SimCommand::Land);
        self.status = DroneStatus {
            mode: FlightMode::Idle,
            airborne: false,
        };
        Ok(())
    }

    async fn define_trajectory(
        &mut self,
        slot: SlotId,
        address: u32,
        piece_count: u8,
    ) -> Result<(), AimError> {
        let end = address as usize + usize::from(piece_count) * PIECE_SIZE;
        if end > self.memory.size() {
            return Err(AimError::device(
                &self.id,
                format!("trajectory in slot {slot} ends past memory at {end}"),
            ));
        }
        self.commands.push(SimCommand::Define {
            slot,
            address,
            piece_count,
        });
        if !self.defined.contains(&slot) {
            self.defined.push(slot);
        }
        Ok(())
    }

    async fn start_trajectory(
        &mut self,
        slot: SlotId,
        mode: TrajectoryMode,
    ) -> Result<(), AimError> {
        if self.fail_start_on == Some(slot) {
            return Err(AimError::device(
                &self.id,
                format!("start_trajectory rejected for slot {slot}"),
            ));
        }
        if !self.defined.contains(&slot) {
            return Err(AimError::device(
                &self.id,
                format!("slot {slot} has no trajectory defined"),
            ));
        }
        self.commands.push(SimCommand::Start { slot, mode });
        Ok(())
    }

    fn memory(&mut self) -> &mut dyn TrajectoryMemory {
        &mut self.memory
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated broadcaster
// ────────────────────────────────────────────────────────────────────────────

/// A packet captured by [`SimBroadcaster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPacket {
    pub port: u8,
    pub channel: u8,
    pub payload: Vec<u8>,
}

/// Records every broadcast packet.  Always succeeds.
#[derive(Default)]
pub struct SimBroadcaster {
    packets: StdMutex<Vec<SimPacket>>,
}

impl SimBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the packets sent so far.
    pub fn packets(&self) -> Vec<SimPacket> {
        self.packets
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broadcaster for SimBroadcaster {
    async fn broadcast(&self, port: u8, channel: u8, payload: &[u8]) -> Result<(), AimError> {
        let mut packets = self
            .packets
            .lock()
            .map_err(|_| AimError::device("sim broadcaster", "packet log poisoned"))?;
        packets.push(SimPacket {
            port,
            channel,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
