//! Motion-capture → fleet pose relay.
//!
//! [`PoseRelay`] listens to [`Topic::MotionCapture`] frames, keeps the
//! markers that belong to tracked objects (not drones), and broadcasts their
//! poses to the whole fleet in packed external-pose packets:
//!
//! ```text
//! [EXT_POSE_PACKED] { id: u8, x, y, z: i16 mm, quat: u32 } × ≤ 2
//! ```
//!
//! Ids carry an alternating low bit: the first accepted pose gets `+0`, the
//! next `+1`, and so on across frames.
//!
//! [`Topic::MotionCapture`]: crate::bus::Topic::MotionCapture

use std::f32::consts::FRAC_1_SQRT_2;
use std::sync::Arc;

use aimotion_hal::Broadcaster;
use aimotion_types::{AimError, EventPayload, MocapFrame, PoseRecord};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bus::TopicReceiver;

/// Command byte of a packed external-pose packet.
pub const EXT_POSE_PACKED: u8 = 9;

/// Link port of the localization service.
pub const DEFAULT_PORT: u8 = 6;

/// Generic localization channel.
pub const DEFAULT_CHANNEL: u8 = 1;

/// Poses per packet.
pub const POSES_PER_PACKET: usize = 2;

/// Marker name prefixes of tracked non-drone objects.
pub const DEFAULT_PREFIXES: [&str; 3] = ["bu", "hook", "test"];

/// Bytes per packed pose.
const PACKED_POSE_LEN: usize = 11;

/// Relays object poses from motion capture to the fleet.
pub struct PoseRelay {
    broadcaster: Arc<dyn Broadcaster>,
    port: u8,
    channel: u8,
    prefixes: Vec<String>,
    toggle: u8,
}

impl PoseRelay {
    /// Relay to `broadcaster` on `port` / `channel` with the
    /// [`DEFAULT_PREFIXES`].
    pub fn new(broadcaster: Arc<dyn Broadcaster>, port: u8, channel: u8) -> Self {
        Self {
            broadcaster,
            port,
            channel,
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            toggle: 0,
        }
    }

    /// Override the marker prefixes (builder-style).
    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Pick the object poses out of `frame`, advancing the id toggle once
    /// per accepted pose.
    pub fn extract_poses(&mut self, frame: &MocapFrame) -> Vec<PoseRecord> {
        let mut poses = Vec::new();
        for item in &frame.items {
            // First prefix whose remainder is a number wins.
            let Some(numeric_id) = self.prefixes.iter().find_map(|prefix| {
                item.name
                    .strip_prefix(prefix.as_str())
                    .and_then(|suffix| suffix.parse::<u32>().ok())
            }) else {
                continue;
            };
            let (Some(position), Some([w, x, y, z])) = (item.position, item.attitude) else {
                continue;
            };
            let Ok(id) = u8::try_from(numeric_id + u32::from(self.toggle)) else {
                warn!(marker = %item.name, "object id does not fit in a byte, skipping");
                continue;
            };

            poses.push(PoseRecord {
                id,
                position,
                orientation: [x, y, z, w],
            });
            self.toggle = 1 - self.toggle;
        }
        poses
    }

    /// Handle one frame and return the number of packets broadcast.
    ///
    /// # Errors
    ///
    /// Returns the first broadcast error; packets already sent stay sent.
    pub async fn handle_frame(&mut self, frame: &MocapFrame) -> Result<usize, AimError> {
        let poses = self.extract_poses(frame);
        let mut sent = 0;
        for chunk in poses.chunks(POSES_PER_PACKET) {
            let packet = encode_packet(chunk);
            self.broadcaster
                .broadcast(self.port, self.channel, &packet)
                .await?;
            sent += 1;
        }
        if sent > 0 {
            debug!(poses = poses.len(), packets = sent, "object poses broadcast");
        }
        Ok(sent)
    }

    /// Consume frames from `receiver` until the bus shuts down.
    pub async fn run(mut self, mut receiver: TopicReceiver) {
        info!(port = self.port, channel = self.channel, "pose relay running");
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let EventPayload::MocapFrame(frame) = event.payload {
                        if let Err(e) = self.handle_frame(&frame).await {
                            warn!(error = %e, "pose broadcast failed");
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "pose relay lagged, frames dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("pose relay stopped");
    }
}

/// Build one packed external-pose packet.
pub fn encode_packet(poses: &[PoseRecord]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + poses.len() * PACKED_POSE_LEN);
    packet.push(EXT_POSE_PACKED);
    for pose in poses {
        packet.push(pose.id);
        for coordinate in pose.position {
            packet.extend_from_slice(&((coordinate * 1000.0) as i16).to_le_bytes());
        }
        packet.extend_from_slice(&compress_quaternion(pose.orientation).to_le_bytes());
    }
    packet
}

/// Smallest-three quaternion compression of `q` in `(x, y, z, w)` order.
///
/// The two top bits hold the index of the largest element; the other three
/// are stored as sign bit plus 9-bit magnitude scaled by `1/sqrt(2)`.  The
/// quaternion is negated first if needed so the largest element is positive.
pub fn compress_quaternion(q: [f32; 4]) -> u32 {
    let mut largest = 0;
    for i in 1..4 {
        if q[i].abs() > q[largest].abs() {
            largest = i;
        }
    }
    let negate = q[largest] < 0.0;

    let mut compressed = largest as u32;
    for (i, &value) in q.iter().enumerate() {
        if i == largest {
            continue;
        }
        let negative_bit = u32::from((value < 0.0) ^ negate);
        let magnitude = ((511.0 * (value.abs() / FRAC_1_SQRT_2)) + 0.5) as u32;
        compressed = (compressed << 10) | (negative_bit << 9) | magnitude.min(511);
    }
    compressed
}
