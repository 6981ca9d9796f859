//! Partitioned, checksum-addressed trajectory memory.
//!
//! Trajectory memory is split into one [`MemoryPartition`] per slot.  Each
//! write is prefixed by an 8-byte header `[len: u32 LE][crc32: u32 LE]` so the
//! writer can skip re-transmitting data that is already on the drone.  The
//! trajectory itself starts right after the header; that address is what the
//! drone is told when the trajectory is defined.

use std::collections::BTreeMap;

use aimotion_types::{AimError, SlotId};
use crc::{CRC_32_ISO_HDLC, Crc};
use tracing::debug;

use crate::drone::TrajectoryMemory;

/// CRC32 algorithm (ISO HDLC / Ethernet / ZIP)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Number of bytes [`write_with_checksum`] places before the data.
pub const CHECKSUM_HEADER_LEN: usize = 8;

/// Build the header that precedes `data` in memory.
pub fn checksum_header(data: &[u8]) -> [u8; CHECKSUM_HEADER_LEN] {
    let mut header = [0u8; CHECKSUM_HEADER_LEN];
    header[..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
    header[4..].copy_from_slice(&CRC32.checksum(data).to_le_bytes());
    header
}

/// Write `data` at `address` behind a length + CRC32 header.
///
/// With `only_if_changed`, the header already on the drone is read first and
/// the data is not sent again when it matches.  The header is written after
/// the data, so an interrupted write never leaves a matching header in front
/// of stale bytes.
///
/// Returns the number of header bytes placed before the data.
///
/// # Errors
///
/// Propagates any [`AimError::Device`] from the memory driver.
pub async fn write_with_checksum(
    memory: &mut dyn TrajectoryMemory,
    address: u32,
    data: &[u8],
    only_if_changed: bool,
) -> Result<usize, AimError> {
    let header = checksum_header(data);

    if only_if_changed {
        let existing = memory.read(address, CHECKSUM_HEADER_LEN).await?;
        if existing == header {
            debug!(address, len = data.len(), "trajectory memory unchanged, skipping write");
            return Ok(CHECKSUM_HEADER_LEN);
        }
    }

    memory.write(address + CHECKSUM_HEADER_LEN as u32, data).await?;
    memory.write(address, &header).await?;
    Ok(CHECKSUM_HEADER_LEN)
}

/// Address range and capacity reserved for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPartition {
    pub slot: SlotId,
    pub start_address: u32,
    pub max_size: usize,
}

impl MemoryPartition {
    fn end(&self) -> u64 {
        u64::from(self.start_address) + self.max_size as u64
    }
}

/// All configured partitions, keyed by slot.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    partitions: BTreeMap<SlotId, MemoryPartition>,
}

impl PartitionTable {
    /// Build a table, rejecting duplicate slots and overlapping ranges.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Config`] when two partitions share a slot or
    /// overlap.
    pub fn new(partitions: impl IntoIterator<Item = MemoryPartition>) -> Result<Self, AimError> {
        let mut table = BTreeMap::new();
        for partition in partitions {
            if table.insert(partition.slot, partition).is_some() {
                return Err(AimError::Config(format!(
                    "slot {} has more than one partition",
                    partition.slot
                )));
            }
        }

        let mut ranges: Vec<&MemoryPartition> = table.values().collect();
        ranges.sort_by_key(|p| p.start_address);
        for pair in ranges.windows(2) {
            if pair[0].end() > u64::from(pair[1].start_address) {
                return Err(AimError::Config(format!(
                    "partitions for slots {} and {} overlap",
                    pair[0].slot, pair[1].slot
                )));
            }
        }

        Ok(Self { partitions: table })
    }

    pub fn get(&self, slot: SlotId) -> Option<&MemoryPartition> {
        self.partitions.get(&slot)
    }

    /// Check that every partition fits in a memory of `memory_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Config`] naming the first partition that does not
    /// fit.
    pub fn check_fits(&self, memory_size: usize) -> Result<(), AimError> {
        match self.partitions.values().find(|p| p.end() > memory_size as u64) {
            Some(p) => Err(AimError::Config(format!(
                "partition for slot {} ends past trajectory memory ({memory_size} bytes)",
                p.slot
            ))),
            None => Ok(()),
        }
    }
}

/// Writes encoded trajectories into their slot's partition.
#[derive(Debug, Clone)]
pub struct PartitionWriter {
    table: PartitionTable,
}

impl PartitionWriter {
    pub fn new(table: PartitionTable) -> Self {
        Self { table }
    }

    /// Write `bytes` into the partition of `slot` and return the address the
    /// trajectory data starts at.
    ///
    /// The size check happens before anything is sent, so a trajectory that
    /// does not fit never touches the neighbouring partition.
    ///
    /// # Errors
    ///
    /// - [`AimError::Capacity`] – header plus data exceed the partition.
    /// - [`AimError::Device`] – unknown slot or a failed memory operation.
    pub async fn write(
        &self,
        memory: &mut dyn TrajectoryMemory,
        slot: SlotId,
        bytes: &[u8],
    ) -> Result<u32, AimError> {
        let partition = self.table.get(slot).ok_or_else(|| {
            AimError::device(
                "trajectory memory",
                format!("no partition configured for slot {slot}"),
            )
        })?;

        let total_size = CHECKSUM_HEADER_LEN + bytes.len();
        if total_size > partition.max_size {
            return Err(AimError::Capacity {
                slot,
                size: total_size,
                max: partition.max_size,
            });
        }

        let header_len = write_with_checksum(memory, partition.start_address, bytes, true).await?;
        debug!(slot, size = total_size, max = partition.max_size, "trajectory written");
        Ok(partition.start_address + header_len as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimMemory;

    fn table() -> PartitionTable {
        PartitionTable::new([
            MemoryPartition { slot: 1, start_address: 0, max_size: 64 },
            MemoryPartition { slot: 2, start_address: 64, max_size: 32 },
        ])
        .unwrap()
    }

    #[test]
    fn header_holds_length_and_crc() {
        let header = checksum_header(b"123456789");
        assert_eq!(&header[..4], &9u32.to_le_bytes());
        // CRC-32/ISO-HDLC check value.
        assert_eq!(&header[4..], &0xCBF4_3926u32.to_le_bytes());
    }

    #[tokio::test]
    async fn write_places_header_then_data() {
        let mut mem = SimMemory::new(128);
        let n = write_with_checksum(&mut mem, 10, b"abc", true).await.unwrap();
        assert_eq!(n, CHECKSUM_HEADER_LEN);
        assert_eq!(&mem.bytes()[10..18], &checksum_header(b"abc"));
        assert_eq!(&mem.bytes()[18..21], b"abc");
    }

    #[tokio::test]
    async fn unchanged_data_is_not_sent_again() {
        let mut mem = SimMemory::new(128);
        write_with_checksum(&mut mem, 0, b"same data", true).await.unwrap();
        let writes = mem.write_count();

        write_with_checksum(&mut mem, 0, b"same data", true).await.unwrap();
        assert_eq!(mem.write_count(), writes);

        write_with_checksum(&mut mem, 0, b"new data!", true).await.unwrap();
        assert!(mem.write_count() > writes);
    }

    #[tokio::test]
    async fn unconditional_write_always_sends() {
        let mut mem = SimMemory::new(128);
        write_with_checksum(&mut mem, 0, b"x", false).await.unwrap();
        let writes = mem.write_count();
        write_with_checksum(&mut mem, 0, b"x", false).await.unwrap();
        assert_eq!(mem.write_count(), writes + 2);
    }

    #[tokio::test]
    async fn writer_returns_address_after_header() {
        let writer = PartitionWriter::new(table());
        let mut mem = SimMemory::new(128);
        let addr = writer.write(&mut mem, 2, &[7u8; 10]).await.unwrap();
        assert_eq!(addr, 64 + CHECKSUM_HEADER_LEN as u32);
    }

    #[tokio::test]
    async fn writer_accepts_exact_fit() {
        let writer = PartitionWriter::new(table());
        let mut mem = SimMemory::new(128);
        let data = vec![1u8; 32 - CHECKSUM_HEADER_LEN];
        assert!(writer.write(&mut mem, 2, &data).await.is_ok());
    }

    #[tokio::test]
    async fn writer_rejects_oversized_without_writing() {
        let writer = PartitionWriter::new(table());
        let mut mem = SimMemory::new(128);
        let data = vec![1u8; 32 - CHECKSUM_HEADER_LEN + 1];

        let err = writer.write(&mut mem, 2, &data).await.unwrap_err();
        assert_eq!(
            err,
            AimError::Capacity { slot: 2, size: 33, max: 32 }
        );
        assert_eq!(mem.write_count(), 0);
        assert!(mem.bytes().iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn writer_rejects_unknown_slot() {
        let writer = PartitionWriter::new(table());
        let mut mem = SimMemory::new(128);
        let err = writer.write(&mut mem, 9, b"x").await.unwrap_err();
        assert!(matches!(err, AimError::Device { .. }));
    }

    #[test]
    fn table_rejects_overlap() {
        let result = PartitionTable::new([
            MemoryPartition { slot: 1, start_address: 0, max_size: 100 },
            MemoryPartition { slot: 2, start_address: 99, max_size: 10 },
        ]);
        assert!(matches!(result, Err(AimError::Config(_))));
    }

    #[test]
    fn table_rejects_duplicate_slot() {
        let result = PartitionTable::new([
            MemoryPartition { slot: 1, start_address: 0, max_size: 10 },
            MemoryPartition { slot: 1, start_address: 10, max_size: 10 },
        ]);
        assert!(matches!(result, Err(AimError::Config(_))));
    }

    #[test]
    fn table_check_fits_memory() {
        assert!(table().check_fits(96).is_ok());
        assert!(table().check_fits(95).is_err());
    }
}
