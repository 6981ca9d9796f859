use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a trajectory slot in drone memory.
pub type SlotId = u8;

/// How a started trajectory is anchored in space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryMode {
    /// Coordinates are offsets from the drone's position at start time.
    Relative,
    /// Coordinates are world-frame positions.
    Absolute,
}

impl TrajectoryMode {
    /// Parse `relative` / `absolute`, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Argument`] for any other value.
    pub fn parse(raw: &str) -> Result<Self, AimError> {
        if raw.eq_ignore_ascii_case("relative") {
            Ok(TrajectoryMode::Relative)
        } else if raw.eq_ignore_ascii_case("absolute") {
            Ok(TrajectoryMode::Absolute)
        } else {
            Err(AimError::Argument(format!(
                "trajectory mode must be 'relative' or 'absolute', got '{raw}'"
            )))
        }
    }
}

impl std::fmt::Display for TrajectoryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrajectoryMode::Relative => write!(f, "relative"),
            TrajectoryMode::Absolute => write!(f, "absolute"),
        }
    }
}

/// One marker as reported by the motion-capture system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSample {
    /// e.g. `"hook3"`, `"bu12"`, `"drone1"`
    pub name: String,
    /// Position in metres, if the marker is currently tracked.
    pub position: Option<[f32; 3]>,
    /// Unit quaternion in `(w, x, y, z)` order, if tracked.
    pub attitude: Option<[f32; 4]>,
}

/// One motion-capture sample holding every visible marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MocapFrame {
    pub items: Vec<MarkerSample>,
}

/// A pose ready to be packed for the fleet broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseRecord {
    pub id: u8,
    pub position: [f32; 3],
    /// Unit quaternion in `(x, y, z, w)` order.
    pub orientation: [f32; 4],
}

/// One point of a trajectory document: arrival time, position, and the
/// Bézier control points shaping the segment that ends here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint(
    pub f32,
    pub [f32; 3],
    #[serde(default)] pub Vec<[f32; 3]>,
);

impl TrajectoryPoint {
    pub fn time(&self) -> f32 {
        self.0
    }

    pub fn position(&self) -> [f32; 3] {
        self.1
    }

    pub fn control_points(&self) -> &[[f32; 3]] {
        &self.2
    }
}

/// Structured trajectory document streamed by the `traj` command.
///
/// ```json
/// {"version": 1, "points": [[0, [0, 0, 0], []], [2, [0, 0, 0.5], []]]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySpec {
    #[serde(default = "default_trajectory_version")]
    pub version: u32,
    pub points: Vec<TrajectoryPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub takeoff_time: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_time: Option<f32>,
}

fn default_trajectory_version() -> u32 {
    1
}

impl TrajectorySpec {
    /// Decode a trajectory document from raw payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Protocol`] when the bytes are not a valid document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, AimError> {
        serde_json::from_slice(bytes)
            .map_err(|e| AimError::Protocol(format!("invalid trajectory document: {e}")))
    }
}

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "aimotion-server::install"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A motion-capture frame from the tracking system.
    MocapFrame(MocapFrame),
    /// A new trajectory is being flown from `slot`.
    TrajectoryActivated {
        drone_id: String,
        slot: SlotId,
        mode: TrajectoryMode,
    },
    /// A drone operation failed.
    DroneFault { drone_id: String, message: String },
}

/// Error type shared by the protocol, the drivers, and the relay.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AimError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Trajectory too long for slot {slot}: {size} bytes exceeds {max}")]
    Capacity { slot: SlotId, size: usize, max: usize },

    #[error("Device fault on {component}: {details}")]
    Device { component: String, details: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AimError {
    /// Shorthand for [`AimError::Device`].
    pub fn device(component: impl Into<String>, details: impl Into<String>) -> Self {
        AimError::Device {
            component: component.into(),
            details: details.into(),
        }
    }
}
