// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Robot waypoints and spray paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::settings::SegmentSettings;

/// A 6-DOF cartesian waypoint (millimetres, degrees).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct RobotPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl RobotPose {
    pub fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            x,
            y,
            z,
            rx,
            ry,
            rz,
        }
    }

    /// Euclidean distance between the positional parts of two poses.
    /// Orientation is ignored.
    pub fn distance_to(&self, other: &RobotPose) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Whether `other` lies within `threshold` of this pose.
    pub fn is_within(&self, other: &RobotPose, threshold: f64) -> bool {
        self.distance_to(other) <= threshold
    }
}

impl From<[f64; 6]> for RobotPose {
    fn from(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl From<RobotPose> for [f64; 6] {
    fn from(p: RobotPose) -> Self {
        [p.x, p.y, p.z, p.rx, p.ry, p.rz]
    }
}

impl fmt::Display for RobotPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}]",
            self.x, self.y, self.z, self.rx, self.ry, self.rz
        )
    }
}

/// One continuous spray stroke together with the glue settings it is
/// dispensed with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GluePath {
    pub points: Vec<RobotPose>,
    #[serde(default)]
    pub settings: SegmentSettings,
}

impl GluePath {
    pub fn new(points: Vec<RobotPose>, settings: SegmentSettings) -> Self {
        Self { points, settings }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of the last waypoint, or 0 for an empty path.
    pub fn last_index(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// Clamp a progress index reported by a worker into `[0, len-1]`.
    pub fn clamp_index(&self, index: usize) -> usize {
        index.min(self.last_index())
    }
}
