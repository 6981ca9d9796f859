//! `aimotion-middleware` – Event Routing
//!
//! Routes motion-capture frames and flight notifications between the
//! tracking system, the protocol server, and the fleet radio.
//!
//! # Modules
//!
//! - [`bus`] – Topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`pose_relay`] – Re-broadcasts tracked object poses to the fleet as
//!   packed external-pose packets.

pub mod bus;
pub mod pose_relay;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use pose_relay::PoseRelay;
