use nalgebra::{
    AbstractRotation, Isometry, Isometry3, Translation3, UnitQuaternion, Vector2, Vector3, Vector6,
};

/// Rigid 3D transform (rotation + translation)
pub type Transform = Isometry3<f64>;
pub type Point3d = Vector3<f64>;
pub type Point2d = Vector2<f64>;

/// Builds a transform from an angle-axis rotation vector and a position.
pub fn make_transform(rotvec: &Point3d, position: &Point3d) -> Transform {
    Isometry3::from_parts(
        Translation3::from(*position),
        UnitQuaternion::from_scaled_axis(*rotvec),
    )
}

/// Residual pose of a relative constraint: identity when `x1^-1 * x2 == z`.
pub fn between<R: AbstractRotation<f64, D>, const D: usize>(
    x1: &Isometry<f64, R, D>,
    x2: &Isometry<f64, R, D>,
    z: &Isometry<f64, R, D>,
) -> Isometry<f64, R, D> {
    z.inverse() * x1.inverse() * x2
}

/// Tangent coordinates `[rx, ry, rz, x, y, z]` of a transform near identity.
/// Inverse of [`exp`].
pub fn log(t: &Transform) -> Vector6<f64> {
    let w = t.rotation.scaled_axis();
    let v = t.translation.vector;
    Vector6::new(w.x, w.y, w.z, v.x, v.y, v.z)
}

pub fn exp(delta: &Vector6<f64>) -> Transform {
    make_transform(
        &delta.fixed_rows::<3>(0).into_owned(),
        &delta.fixed_rows::<3>(3).into_owned(),
    )
}

/// Right perturbation `x * exp(delta)`.
pub fn retract(x: &Transform, delta: &Vector6<f64>) -> Transform {
    x * exp(delta)
}

/// Pose difference in tangent space, `log(a^-1 * b)`.
pub fn local(a: &Transform, b: &Transform) -> Vector6<f64> {
    log(&(a.inverse() * b))
}
