//! Axis-aligned simulation boxes.

use serde::{Deserialize, Serialize};

/// Floating point type used for all particle data.
pub type Scalar = f64;

/// Three-component vector.
pub type Vec3 = [Scalar; 3];

/// Axis-aligned box with inclusive lower and exclusive upper bounds.
///
/// Used both for the global periodic domain and for each rank's sub-box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxDim {
    /// Lower corner [x, y, z]
    pub lo: Vec3,
    /// Upper corner [x, y, z]
    pub hi: Vec3,
}

impl BoxDim {
    /// Create a box from its corners.
    pub fn new(lo: Vec3, hi: Vec3) -> Self {
        Self { lo, hi }
    }

    /// Cube `[0, length)` on every axis.
    pub fn cube(length: Scalar) -> Self {
        Self::new([0.0; 3], [length; 3])
    }

    /// Edge lengths per axis.
    pub fn lengths(&self) -> Vec3 {
        [
            self.hi[0] - self.lo[0],
            self.hi[1] - self.lo[1],
            self.hi[2] - self.lo[2],
        ]
    }

    /// Whether `p` lies inside under the `lo <= p < hi` convention.
    pub fn contains(&self, p: &Vec3) -> bool {
        (0..3).all(|a| p[a] >= self.lo[a] && p[a] < self.hi[a])
    }

    /// Whether every edge has positive length.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|a| self.hi[a] > self.lo[a])
    }

    /// Map `p` into the box along every axis, adjusting the image counters.
    ///
    /// Only used on the global box; sub-boxes are never periodic on their own.
    pub fn wrap(&self, p: &mut Vec3, image: &mut [i32; 3]) {
        let l = self.lengths();
        for a in 0..3 {
            if p[a] >= self.hi[a] {
                let shift = ((p[a] - self.lo[a]) / l[a]).floor();
                p[a] -= shift * l[a];
                image[a] += shift as i32;
            } else if p[a] < self.lo[a] {
                let shift = ((self.lo[a] - p[a]) / l[a]).ceil();
                p[a] += shift * l[a];
                image[a] -= shift as i32;
            }
            // Rounding can land exactly on hi.
            if p[a] >= self.hi[a] {
                p[a] -= l[a];
                image[a] += 1;
            }
        }
    }
}
