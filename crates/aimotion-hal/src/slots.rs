//! [`ActiveSlotManager`] – alternation between the two working trajectory
//! slots.
//!
//! One slot is always the one being flown; the other is always the next
//! write target.  A new trajectory is written into the idle slot and the
//! manager is advanced only once the drone has started flying it, so the
//! drone is never asked to overwrite the trajectory it is following.

use aimotion_types::{AimError, SlotId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSlotManager {
    slots: (SlotId, SlotId),
    current: SlotId,
}

impl ActiveSlotManager {
    /// Manage slots `first` and `second`, starting with `first` as current.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Config`] when both ids are equal.
    pub fn new(first: SlotId, second: SlotId) -> Result<Self, AimError> {
        if first == second {
            return Err(AimError::Config(format!(
                "working slots must differ, got {first} twice"
            )));
        }
        Ok(Self {
            slots: (first, second),
            current: first,
        })
    }

    pub fn current(&self) -> SlotId {
        self.current
    }

    /// The slot the next trajectory goes into.
    pub fn next(&self) -> SlotId {
        self.next_after(self.current)
    }

    /// The other working slot: `first + second - slot`.
    pub fn next_after(&self, slot: SlotId) -> SlotId {
        let sum = u16::from(self.slots.0) + u16::from(self.slots.1);
        sum.wrapping_sub(u16::from(slot)) as SlotId
    }

    /// Record that the drone now flies `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Device`] unless `slot` is [`Self::next`].
    pub fn advance_to(&mut self, slot: SlotId) -> Result<(), AimError> {
        if slot != self.next() {
            return Err(AimError::device(
                "slot manager",
                format!(
                    "cannot activate slot {slot}: current is {}, next is {}",
                    self.current,
                    self.next()
                ),
            ));
        }
        self.current = slot;
        Ok(())
    }
}
