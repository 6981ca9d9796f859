//! `aimotion-hal` – Drone Abstraction Layer
//!
//! Everything the protocol knows about the drone goes through this crate.
//!
//! # Modules
//!
//! - [`drone`] – [`Drone`] and [`TrajectoryMemory`] driver traits.
//! - [`broadcast`] – [`Broadcaster`] for fleet-wide packets.
//! - [`memory`] – checksum writes and the [`PartitionWriter`].
//! - [`slots`] – [`ActiveSlotManager`] alternation between working slots.
//! - [`poly4d`] – trajectory document → poly4d memory image.
//! - [`registry`] – [`DroneRegistry`] lookup by id.
//! - [`sim`] – simulated drivers for tests and radio-less runs.

pub mod broadcast;
pub mod drone;
pub mod memory;
pub mod poly4d;
pub mod registry;
pub mod sim;
pub mod slots;

pub use broadcast::Broadcaster;
pub use drone::{Drone, DroneStatus, FlightMode, SharedDrone, TrajectoryMemory};
pub use memory::{MemoryPartition, PartitionTable, PartitionWriter};
pub use poly4d::EncodedTrajectory;
pub use registry::DroneRegistry;
pub use slots::ActiveSlotManager;
