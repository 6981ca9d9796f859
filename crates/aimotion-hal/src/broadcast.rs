//! Generic `Broadcaster` trait for unaddressed packets sent to the whole
//! fleet at once.

use aimotion_types::AimError;
use async_trait::async_trait;

/// Sends raw packets to every drone in radio range.
///
/// Broadcasts do not touch any single drone's memory or motion state, so
/// implementations are used without the per-drone lock.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send `payload` on the given link `port` and `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Device`] if the radio refuses the packet.
    async fn broadcast(&self, port: u8, channel: u8, payload: &[u8]) -> Result<(), AimError>;
}
