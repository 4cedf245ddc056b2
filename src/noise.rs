use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::geometry::{Point3d, Transform};

/// 6-DOF pose noise, ordered `[rx, ry, rz, x, y, z]`.
///
/// When `is_diagonal` is set, the diagonal of `noise` holds standard
/// deviations. Otherwise `noise` is a full covariance matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseNoise2 {
    pub noise: Matrix6<f64>,
    pub is_diagonal: bool,
}

impl PoseNoise2 {
    pub fn new(noise: Matrix6<f64>, is_diagonal: bool) -> PoseNoise2 {
        PoseNoise2 { noise, is_diagonal }
    }

    /// Diagonal noise from per-axis rotation and position sigmas.
    pub fn make(rot: &Point3d, pos: &Point3d) -> PoseNoise2 {
        let d = Vector6::new(rot.x, rot.y, rot.z, pos.x, pos.y, pos.z);
        PoseNoise2::new(Matrix6::from_diagonal(&d), true)
    }

    /// Same sigma on all rotation axes and on all position axes.
    pub fn make_scalar(rot: f64, pos: f64) -> PoseNoise2 {
        PoseNoise2::make(&Point3d::repeat(rot), &Point3d::repeat(pos))
    }

    pub fn from_covariance(cov: Matrix6<f64>) -> PoseNoise2 {
        PoseNoise2::new(cov, false)
    }

    pub fn diagonal(&self) -> Vector6<f64> {
        self.noise.diagonal()
    }

    pub fn covariance(&self) -> Matrix6<f64> {
        if self.is_diagonal {
            Matrix6::from_diagonal(&self.diagonal().map(|s| s * s))
        } else {
            self.noise
        }
    }

    /// Inverse covariance, used to whiten pose residuals.
    pub fn information(&self) -> Result<Matrix6<f64>> {
        if self.is_diagonal {
            let d = self.diagonal();
            if d.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(Error::SingularSystem);
            }
            Ok(Matrix6::from_diagonal(&d.map(|s| 1.0 / (s * s))))
        } else {
            self.noise.try_inverse().ok_or(Error::SingularSystem)
        }
    }
}

impl fmt::Display for PoseNoise2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "is_diagonal: {}", self.is_diagonal)?;
        write!(f, "{}", self.noise)
    }
}

/// A pose together with its uncertainty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseWithNoise {
    pub pose: Transform,
    pub noise: PoseNoise2,
    pub valid: bool,
}

impl PoseWithNoise {
    pub fn new(pose: Transform, noise: PoseNoise2, valid: bool) -> PoseWithNoise {
        PoseWithNoise { pose, noise, valid }
    }
}

impl fmt::Display for PoseWithNoise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.pose.rotation.scaled_axis();
        let t = self.pose.translation.vector;
        writeln!(
            f,
            "pose: r=[{:.5} {:.5} {:.5}] t=[{:.5} {:.5} {:.5}] valid: {}",
            r.x, r.y, r.z, t.x, t.y, t.z, self.valid
        )?;
        write!(f, "{}", self.noise)
    }
}
