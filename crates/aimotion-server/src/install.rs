//! Trajectory install: hover fallback, memory write, slot hot-swap.
//!
//! A new trajectory always goes into the working slot the drone is *not*
//! flying.  While it is being written the drone holds position on the hover
//! trajectory, and the slot manager only moves on once the drone has accepted
//! the start command.

use aimotion_hal::{ActiveSlotManager, Drone, PartitionWriter, poly4d};
use aimotion_types::{AimError, SlotId, TrajectoryMode, TrajectorySpec};
use tracing::{debug, info, instrument};

/// Slot bookkeeping that must outlive a single client session.
#[derive(Debug)]
pub struct FlightSlots {
    pub slots: ActiveSlotManager,
    pub hover_slot: SlotId,
    /// Set once the hover trajectory has been written and defined.
    pub hover_defined: bool,
}

impl FlightSlots {
    /// # Errors
    ///
    /// Returns [`AimError::Config`] when the working slots are equal or the
    /// hover slot is one of them.
    pub fn new(hover_slot: SlotId, working_slots: (SlotId, SlotId)) -> Result<Self, AimError> {
        if hover_slot == working_slots.0 || hover_slot == working_slots.1 {
            return Err(AimError::Config(format!(
                "hover slot {hover_slot} must not be a working slot"
            )));
        }
        Ok(Self {
            slots: ActiveSlotManager::new(working_slots.0, working_slots.1)?,
            hover_slot,
            hover_defined: false,
        })
    }
}

/// Install the trajectory document in `payload` and start flying it.
///
/// Returns the slot the trajectory now runs from.
///
/// # Errors
///
/// - [`AimError::Precondition`] – the drone is not airborne under show
///   control; nothing was sent to it.
/// - [`AimError::Protocol`] – the payload is not a valid trajectory.
/// - [`AimError::Capacity`] – the trajectory does not fit its partition.
/// - [`AimError::Device`] – any drone or memory operation failed.
///
/// On every error the active slot is left unchanged.
#[instrument(skip_all, fields(drone = drone.id(), %mode, payload_len = payload.len()))]
pub async fn install_trajectory(
    drone: &mut dyn Drone,
    writer: &PartitionWriter,
    flight: &mut FlightSlots,
    mode: TrajectoryMode,
    payload: &[u8],
) -> Result<SlotId, AimError> {
    let status = drone.status().await?;
    if !status.accepts_trajectories() {
        return Err(AimError::Precondition(format!(
            "drone must be airborne in show mode (mode {:?}, airborne {})",
            status.mode, status.airborne
        )));
    }

    if !flight.hover_defined {
        let hover = poly4d::hover_trajectory();
        let address = writer
            .write(drone.memory(), flight.hover_slot, &hover.bytes)
            .await?;
        drone
            .define_trajectory(flight.hover_slot, address, hover.piece_count)
            .await?;
        flight.hover_defined = true;
        debug!(slot = flight.hover_slot, address, "hover trajectory defined");
    }
    drone
        .start_trajectory(flight.hover_slot, TrajectoryMode::Relative)
        .await?;

    let spec = TrajectorySpec::from_json(payload)?;
    let encoded = poly4d::encode(&spec)?;

    let slot = flight.slots.next();
    let address = writer.write(drone.memory(), slot, &encoded.bytes).await?;
    drone
        .define_trajectory(slot, address, encoded.piece_count)
        .await?;
    drone.start_trajectory(slot, mode).await?;
    flight.slots.advance_to(slot)?;

    info!(
        slot,
        address,
        pieces = encoded.piece_count,
        bytes = encoded.bytes.len(),
        "trajectory started"
    );
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimotion_hal::memory::{CHECKSUM_HEADER_LEN, MemoryPartition, PartitionTable};
    use aimotion_hal::sim::{SimCommand, SimDrone};
    use aimotion_hal::{DroneStatus, FlightMode};

    const DOC: &[u8] = br#"{"version":1,"points":[[0,[0,0,0],[]],[2,[0,0,0.5],[]],[4,[1,0,0.5],[[0.5,0.5,0.5]]]]}"#;

    fn writer() -> PartitionWriter {
        PartitionWriter::new(
            PartitionTable::new([
                MemoryPartition { slot: 1, start_address: 0, max_size: 280 },
                MemoryPartition { slot: 2, start_address: 280, max_size: 1900 },
                MemoryPartition { slot: 3, start_address: 2180, max_size: 1900 },
            ])
            .unwrap(),
        )
    }

    fn flight() -> FlightSlots {
        FlightSlots::new(1, (2, 3)).unwrap()
    }

    #[tokio::test]
    async fn first_install_defines_hover_and_uses_idle_slot() {
        let mut drone = SimDrone::new("04").airborne_in_show();
        let mut flight = flight();

        let slot = install_trajectory(&mut drone, &writer(), &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap();

        assert_eq!(slot, 3);
        assert_eq!(flight.slots.current(), 3);
        assert!(flight.hover_defined);
        assert_eq!(
            drone.commands(),
            &[
                SimCommand::Define { slot: 1, address: CHECKSUM_HEADER_LEN as u32, piece_count: 1 },
                SimCommand::Start { slot: 1, mode: TrajectoryMode::Relative },
                SimCommand::Define { slot: 3, address: 2180 + CHECKSUM_HEADER_LEN as u32, piece_count: 2 },
                SimCommand::Start { slot: 3, mode: TrajectoryMode::Relative },
            ]
        );
    }

    #[tokio::test]
    async fn consecutive_installs_alternate_and_hover_is_defined_once() {
        let mut drone = SimDrone::new("04").airborne_in_show();
        let mut flight = flight();
        let writer = writer();

        let first = install_trajectory(&mut drone, &writer, &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap();
        let second = install_trajectory(&mut drone, &writer, &mut flight, TrajectoryMode::Absolute, DOC)
            .await
            .unwrap();
        let third = install_trajectory(&mut drone, &writer, &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap();

        assert_eq!((first, second, third), (3, 2, 3));
        let hover_defines = drone
            .commands()
            .iter()
            .filter(|c| matches!(c, SimCommand::Define { slot: 1, .. }))
            .count();
        assert_eq!(hover_defines, 1);
    }

    #[tokio::test]
    async fn refuses_when_not_in_show_mode() {
        let mut drone = SimDrone::new("04");
        drone.set_status(DroneStatus { mode: FlightMode::Manual, airborne: true });
        let mut flight = flight();

        let err = install_trajectory(&mut drone, &writer(), &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap_err();

        assert!(matches!(err, AimError::Precondition(_)));
        assert!(drone.commands().is_empty());
        assert_eq!(drone.sim_memory().write_count(), 0);
        assert!(!flight.hover_defined);
        assert_eq!(flight.slots.current(), 2);
    }

    #[tokio::test]
    async fn refuses_when_grounded() {
        let mut drone = SimDrone::new("04");
        let mut flight = flight();
        let err = install_trajectory(&mut drone, &writer(), &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap_err();
        assert!(matches!(err, AimError::Precondition(_)));
    }

    #[tokio::test]
    async fn bad_document_keeps_active_slot() {
        let mut drone = SimDrone::new("04").airborne_in_show();
        let mut flight = flight();

        let err = install_trajectory(&mut drone, &writer(), &mut flight, TrajectoryMode::Relative, b"{\"points\": 3}")
            .await
            .unwrap_err();

        assert!(matches!(err, AimError::Protocol(_)));
        assert_eq!(flight.slots.current(), 2);
        // The drone was parked on the hover trajectory before decoding.
        assert_eq!(
            drone.commands().last(),
            Some(&SimCommand::Start { slot: 1, mode: TrajectoryMode::Relative })
        );
    }

    #[tokio::test]
    async fn oversized_trajectory_writes_nothing_to_the_slot() {
        let mut drone = SimDrone::new("04").airborne_in_show();
        let mut flight = flight();
        let small = PartitionWriter::new(
            PartitionTable::new([
                MemoryPartition { slot: 1, start_address: 0, max_size: 280 },
                MemoryPartition { slot: 2, start_address: 280, max_size: 140 },
                MemoryPartition { slot: 3, start_address: 420, max_size: 140 },
            ])
            .unwrap(),
        );

        let err = install_trajectory(&mut drone, &small, &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap_err();

        assert!(matches!(err, AimError::Capacity { slot: 3, max: 140, .. }));
        assert!(err.to_string().starts_with("Trajectory too long"));
        assert_eq!(flight.slots.current(), 2);
        assert!(drone.sim_memory().bytes()[420..560].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn failed_start_keeps_active_slot() {
        let mut drone = SimDrone::new("04").airborne_in_show().failing_start_on(3);
        let mut flight = flight();

        let err = install_trajectory(&mut drone, &writer(), &mut flight, TrajectoryMode::Relative, DOC)
            .await
            .unwrap_err();

        assert!(matches!(err, AimError::Device { .. }));
        // Everything up to the start of slot 3 went through.
        assert!(drone.sim_memory().write_count() > 0);
        assert!(drone.commands().iter().any(|c| matches!(c, SimCommand::Define { slot: 3, .. })));
        assert!(!drone.commands().iter().any(|c| matches!(c, SimCommand::Start { slot: 3, .. })));
        assert_eq!(
            drone.commands().last(),
            Some(&SimCommand::Define { slot: 3, address: 2180 + CHECKSUM_HEADER_LEN as u32, piece_count: 2 })
        );
        assert_eq!(flight.slots.current(), 2);

        // The next attempt targets slot 3 again.
        assert_eq!(flight.slots.next(), 3);
    }

    #[test]
    fn hover_slot_must_not_be_a_working_slot() {
        assert!(matches!(FlightSlots::new(2, (2, 3)), Err(AimError::Config(_))));
        assert!(matches!(FlightSlots::new(1, (2, 2)), Err(AimError::Config(_))));
    }
}
