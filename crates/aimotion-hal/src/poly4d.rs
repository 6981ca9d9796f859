//! Poly4d trajectory encoder.
//!
//! A poly4d trajectory is a list of pieces.  Each piece carries four
//! 7th-degree polynomials (x, y, z, yaw) in seconds since the start of the
//! piece, followed by the piece duration.  In memory a piece is 33
//! little-endian `f32` values (132 bytes):
//!
//! ```text
//! x[0..8] y[0..8] z[0..8] yaw[0..8] duration
//! ```
//!
//! Segments of a [`TrajectorySpec`] are Bézier curves (a straight line when
//! no control points are given) and are converted to the power basis here.

use aimotion_types::{AimError, TrajectorySpec};

/// Coefficients per axis.
pub const COEFFICIENTS: usize = 8;

/// Encoded size of one piece in bytes.
pub const PIECE_SIZE: usize = (4 * COEFFICIENTS + 1) * 4;

/// Highest polynomial degree a piece can hold.
pub const MAX_DEGREE: usize = COEFFICIENTS - 1;

/// How long the fallback hover trajectory holds position, in seconds.
pub const HOVER_DURATION_S: f32 = 10.0;

/// One polynomial piece.
#[derive(Debug, Clone, PartialEq)]
pub struct Poly4dPiece {
    pub x: [f32; COEFFICIENTS],
    pub y: [f32; COEFFICIENTS],
    pub z: [f32; COEFFICIENTS],
    pub yaw: [f32; COEFFICIENTS],
    pub duration: f32,
}

impl Poly4dPiece {
    /// A piece that holds `position` for `duration` seconds.
    pub fn stationary(position: [f32; 3], duration: f32) -> Self {
        let mut piece = Self {
            x: [0.0; COEFFICIENTS],
            y: [0.0; COEFFICIENTS],
            z: [0.0; COEFFICIENTS],
            yaw: [0.0; COEFFICIENTS],
            duration,
        };
        piece.x[0] = position[0];
        piece.y[0] = position[1];
        piece.z[0] = position[2];
        piece
    }

    /// Convert a Bézier segment with `control` points (start and end
    /// included) spanning `duration` seconds.
    fn from_bezier(control: &[[f32; 3]], duration: f32) -> Self {
        let mut piece = Self::stationary([0.0; 3], duration);
        let degree = control.len() - 1;

        for j in 0..=degree {
            let mut sum = [0.0f32; 3];
            for (i, point) in control.iter().enumerate().take(j + 1) {
                let sign = if (j - i) % 2 == 0 { 1.0 } else { -1.0 };
                let weight = sign * binomial(j, i);
                for axis in 0..3 {
                    sum[axis] += weight * point[axis];
                }
            }
            let scale = binomial(degree, j) / duration.powi(j as i32);
            piece.x[j] = sum[0] * scale;
            piece.y[j] = sum[1] * scale;
            piece.z[j] = sum[2] * scale;
        }
        piece
    }

    /// Evaluate the position at `t` seconds into the piece.
    pub fn position_at(&self, t: f32) -> [f32; 3] {
        let eval = |c: &[f32; COEFFICIENTS]| c.iter().rev().fold(0.0f32, |acc, &k| acc * t + k);
        [eval(&self.x), eval(&self.y), eval(&self.z)]
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        for axis in [&self.x, &self.y, &self.z, &self.yaw] {
            for coefficient in axis {
                out.extend_from_slice(&coefficient.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.duration.to_le_bytes());
    }
}

/// An encoded trajectory ready to be written into a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTrajectory {
    pub bytes: Vec<u8>,
    pub piece_count: u8,
}

impl EncodedTrajectory {
    /// Pack `pieces` into the poly4d memory layout.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Protocol`] for more than 255 pieces.
    pub fn from_pieces(pieces: &[Poly4dPiece]) -> Result<Self, AimError> {
        let piece_count = u8::try_from(pieces.len()).map_err(|_| {
            AimError::Protocol(format!(
                "trajectory has {} pieces, at most 255 are supported",
                pieces.len()
            ))
        })?;
        let mut bytes = Vec::with_capacity(pieces.len() * PIECE_SIZE);
        for piece in pieces {
            piece.encode_into(&mut bytes);
        }
        Ok(Self { bytes, piece_count })
    }
}

/// The fallback hover trajectory: hold the start position.  Meant to be
/// started in relative mode.
pub fn hover_trajectory() -> EncodedTrajectory {
    let piece = Poly4dPiece::stationary([0.0; 3], HOVER_DURATION_S);
    let mut bytes = Vec::with_capacity(PIECE_SIZE);
    piece.encode_into(&mut bytes);
    EncodedTrajectory {
        bytes,
        piece_count: 1,
    }
}

/// Convert a trajectory document into poly4d pieces.
///
/// A document whose first point is later than `t = 0` gets a leading piece
/// that holds the first position until then.
///
/// # Errors
///
/// Returns [`AimError::Protocol`] when the document has fewer than two
/// points, times that do not strictly increase, or a segment with more than
/// six control points.
pub fn pieces(spec: &TrajectorySpec) -> Result<Vec<Poly4dPiece>, AimError> {
    let (first, rest) = spec
        .points
        .split_first()
        .filter(|(_, rest)| !rest.is_empty())
        .ok_or_else(|| AimError::Protocol("trajectory needs at least two points".to_string()))?;

    let mut pieces = Vec::with_capacity(spec.points.len());
    if first.time() > 0.0 {
        pieces.push(Poly4dPiece::stationary(first.position(), first.time()));
    }

    let mut previous = first;
    for point in rest {
        let duration = point.time() - previous.time();
        if !(duration > 0.0) {
            return Err(AimError::Protocol(format!(
                "trajectory times must increase: {} follows {}",
                point.time(),
                previous.time()
            )));
        }
        if point.control_points().len() + 1 > MAX_DEGREE {
            return Err(AimError::Protocol(format!(
                "segment ending at t={} has {} control points, at most {} are supported",
                point.time(),
                point.control_points().len(),
                MAX_DEGREE - 1
            )));
        }

        let mut control = Vec::with_capacity(point.control_points().len() + 2);
        control.push(previous.position());
        control.extend_from_slice(point.control_points());
        control.push(point.position());
        pieces.push(Poly4dPiece::from_bezier(&control, duration));

        previous = point;
    }
    Ok(pieces)
}

/// Encode a trajectory document into its memory image.
///
/// # Errors
///
/// See [`pieces`] and [`EncodedTrajectory::from_pieces`].
pub fn encode(spec: &TrajectorySpec) -> Result<EncodedTrajectory, AimError> {
    EncodedTrajectory::from_pieces(&pieces(spec)?)
}

fn binomial(n: usize, k: usize) -> f32 {
    (0..k).fold(1.0f32, |acc, i| acc * (n - i) as f32 / (i + 1) as f32)
}
