use nalgebra::{
    Isometry3, Matrix3, Rotation3, SMatrix, SVector, Translation3, UnitQuaternion, Vector2, Vector3,
    Vector6,
};
use serde::{Deserialize, Serialize};

use crate::geometry::{between, log, retract, Point2d, Point3d, Transform};

/// Residual of a measurement given the poses it constrains.
/// The residual is zero when the poses agree with the measurement.
pub trait MeasurementModel<const Z: usize> {
    /// Number of poses the measurement depends on
    const POSES: usize;

    fn residual(&self, poses: &[Transform]) -> SVector<f64, Z>;

    /// Jacobian of the residual w.r.t. a right perturbation of `poses[which]`,
    /// by central differences.
    fn jacobian(&self, poses: &[Transform], which: usize, step: f64) -> SMatrix<f64, Z, 6> {
        let mut jac = SMatrix::<f64, Z, 6>::zeros();
        let mut perturbed = poses.to_vec();
        for k in 0..6 {
            let delta = Vector6::ith(k, step);
            perturbed[which] = retract(&poses[which], &delta);
            let plus = self.residual(&perturbed);
            perturbed[which] = retract(&poses[which], &(-delta));
            let minus = self.residual(&perturbed);
            jac.set_column(k, &((plus - minus) / (2.0 * step)));
        }
        jac
    }
}

/// Measured pose of `poses[1]` relative to `poses[0]`.
#[derive(Clone, Debug)]
pub struct RelativePoseModel {
    pub measurement: Transform,
}

impl MeasurementModel<6> for RelativePoseModel {
    const POSES: usize = 2;

    fn residual(&self, poses: &[Transform]) -> Vector6<f64> {
        log(&between(&poses[0], &poses[1], &self.measurement))
    }
}

/// Measured pose of `poses[0]` in the world frame.
#[derive(Clone, Debug)]
pub struct AbsolutePoseModel {
    pub measurement: Transform,
}

impl MeasurementModel<6> for AbsolutePoseModel {
    const POSES: usize = 1;

    fn residual(&self, poses: &[Transform]) -> Vector6<f64> {
        log(&(self.measurement.inverse() * poses[0]))
    }
}

/// Pinhole camera
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Points closer than this are clamped to avoid a division by zero
const MIN_DEPTH: f64 = 1e-6;

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> CameraIntrinsics {
        CameraIntrinsics { fx, fy, cx, cy }
    }

    /// Projects a point given in camera coordinates onto the image.
    pub fn project(&self, p: &Point3d) -> Point2d {
        let z = if p.z.abs() < MIN_DEPTH { MIN_DEPTH } else { p.z };
        Vector2::new(self.fx * p.x / z + self.cx, self.fy * p.y / z + self.cy)
    }

    /// Pose of a square tag in the camera frame, `T_c_o`, from its four
    /// detected corners. Decomposes the homography between the tag plane
    /// and the normalized image plane. `None` for degenerate corners.
    pub fn tag_pose_from_corners(&self, image_corners: &[Point2d; 4], tag_size: f64) -> Option<Transform> {
        // h33 fixed to 1, valid while the tag is in front of the camera
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut rhs = SVector::<f64, 8>::zeros();
        for (i, (c, px)) in tag_corners(tag_size).iter().zip(image_corners).enumerate() {
            let x = (px.x - self.cx) / self.fx;
            let y = (px.y - self.cy) / self.fy;
            let rows = [
                [c.x, c.y, 1.0, 0.0, 0.0, 0.0, -x * c.x, -x * c.y],
                [0.0, 0.0, 0.0, c.x, c.y, 1.0, -y * c.x, -y * c.y],
            ];
            for (k, row) in rows.iter().enumerate() {
                for (j, v) in row.iter().enumerate() {
                    a[(2 * i + k, j)] = *v;
                }
            }
            rhs[2 * i] = x;
            rhs[2 * i + 1] = y;
        }
        let h = a.lu().solve(&rhs)?;
        let h1 = Vector3::new(h[0], h[3], h[6]);
        let h2 = Vector3::new(h[1], h[4], h[7]);
        let h3 = Vector3::new(h[2], h[5], 1.0);

        let norm = 0.5 * (h1.norm() + h2.norm());
        if !norm.is_finite() || norm < f64::EPSILON {
            return None;
        }
        let scale = 1.0 / norm;
        let r1 = h1 * scale;
        let r2 = h2 * scale;
        let t = h3 * scale;
        let r = Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]);
        let rotation = Rotation3::from_matrix(&r);
        Some(Isometry3::from_parts(
            Translation3::from(t),
            UnitQuaternion::from_rotation_matrix(&rotation),
        ))
    }
}

/// Corners of a square tag of side `size` in the tag frame, in the order
/// the detector reports them.
pub fn tag_corners(size: f64) -> [Point3d; 4] {
    let s = 0.5 * size;
    [
        Point3d::new(-s, -s, 0.0),
        Point3d::new(s, -s, 0.0),
        Point3d::new(s, s, 0.0),
        Point3d::new(-s, s, 0.0),
    ]
}

/// Image position of a single tag corner.
///
/// Poses are `[T_r_c, T_w_r, T_w_b, T_b_o]`: camera in rig, rig in world,
/// body in world, tag in body.
#[derive(Clone, Debug)]
pub struct CornerProjectionModel {
    pub camera: CameraIntrinsics,
    pub corner: Point3d,
    pub pixel: Point2d,
}

impl CornerProjectionModel {
    pub fn predict(&self, poses: &[Transform]) -> Point2d {
        let t_w_c = poses[1] * poses[0];
        let t_c_o = t_w_c.inverse() * poses[2] * poses[3];
        self.camera.project(&(t_c_o * nalgebra::Point3::from(self.corner)).coords)
    }
}

impl MeasurementModel<2> for CornerProjectionModel {
    const POSES: usize = 4;

    fn residual(&self, poses: &[Transform]) -> Vector2<f64> {
        self.predict(poses) - self.pixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::make_transform;

    #[test]
    fn relative_residual_zero_at_measurement() {
        let z = make_transform(&Point3d::new(0.0, 0.1, 0.0), &Point3d::new(1.0, 0.0, 0.0));
        let a = make_transform(&Point3d::new(0.2, 0.0, 0.0), &Point3d::new(0.0, 1.0, 0.0));
        let model = RelativePoseModel { measurement: z };
        approx::assert_abs_diff_eq!(
            Vector6::zeros(),
            model.residual(&[a, a * z]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn absolute_jacobian_is_identity_at_solution() {
        let z = make_transform(&Point3d::new(0.0, 0.0, 0.3), &Point3d::new(1.0, 2.0, 0.0));
        let model = AbsolutePoseModel { measurement: z };
        let jac = model.jacobian(&[z], 0, 1e-6);
        approx::assert_abs_diff_eq!(SMatrix::<f64, 6, 6>::identity(), jac, epsilon = 1e-6);
    }

    #[test]
    fn tag_pose_recovered_from_its_corners() {
        let camera = CameraIntrinsics::new(600.0, 620.0, 320.0, 240.0);
        let size = 0.16;
        let t_c_o = make_transform(&Point3d::new(0.3, -0.2, 0.1), &Point3d::new(0.2, -0.1, 1.8));
        let pixels = tag_corners(size).map(|c| camera.project(&(t_c_o * nalgebra::Point3::from(c)).coords));
        let estimate = camera.tag_pose_from_corners(&pixels, size);
        assert!(estimate.is_some());
        if let Some(estimate) = estimate {
            approx::assert_abs_diff_eq!(t_c_o.to_homogeneous(), estimate.to_homogeneous(), epsilon = 1e-6);
        }
    }

    #[test]
    fn collapsed_corners_give_no_pose() {
        let camera = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0);
        let pixels = [Point2d::new(320.0, 240.0); 4];
        assert!(camera.tag_pose_from_corners(&pixels, 0.16).is_none());
    }

    #[test]
    fn projection_of_tag_in_front_of_camera() {
        let camera = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
        let corners = tag_corners(0.2);
        // tag one meter in front of a camera at the origin
        let t_b_o = make_transform(&Point3d::zeros(), &Point3d::new(0.0, 0.0, 1.0));
        let poses = [Transform::identity(), Transform::identity(), Transform::identity(), t_b_o];
        let model = CornerProjectionModel {
            camera,
            corner: corners[2],
            pixel: Point2d::new(370.0, 290.0),
        };
        approx::assert_abs_diff_eq!(Vector2::zeros(), model.residual(&poses), epsilon = 1e-9);
        approx::assert_abs_diff_eq!(Point2d::new(370.0, 290.0), model.predict(&poses), epsilon = 1e-9);
    }
}
