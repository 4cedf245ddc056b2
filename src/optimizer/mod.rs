mod levenberg_marquardt;

pub use levenberg_marquardt::LevenbergMarquardt;

use crate::error::Result;
use crate::geometry::{Point2d, Transform};
use crate::models::CameraIntrinsics;
use crate::noise::PoseNoise2;

/// Key of a variable or factor inside the optimizer
pub type OptimizerKey = u64;
/// Key of a pose variable
pub type ValueKey = OptimizerKey;
/// Key of a factor
pub type FactorKey = OptimizerKey;

/// Keys of the four poses a tag projection constrains
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagProjectionKeys {
    /// camera in rig
    pub t_r_c: ValueKey,
    /// rig in world
    pub t_w_r: ValueKey,
    /// body in world
    pub t_w_b: ValueKey,
    /// tag in body
    pub t_b_o: ValueKey,
}

impl TagProjectionKeys {
    pub fn as_array(&self) -> [ValueKey; 4] {
        [self.t_r_c, self.t_w_r, self.t_w_b, self.t_b_o]
    }
}

/// Nonlinear least squares back end the graph hands its variables and
/// factors to.
pub trait Optimizer {
    fn add_pose_variable(&mut self, initial_guess: &Transform) -> ValueKey;

    fn add_relative_pose_prior_factor(
        &mut self,
        key_a: ValueKey,
        key_b: ValueKey,
        measurement: &Transform,
        noise: &PoseNoise2,
    ) -> Result<FactorKey>;

    fn add_absolute_pose_prior_factor(
        &mut self,
        key: ValueKey,
        measurement: &Transform,
        noise: &PoseNoise2,
    ) -> Result<FactorKey>;

    /// Adds one factor per tag corner and returns their keys in corner order.
    #[allow(clippy::too_many_arguments)]
    fn add_tag_projection_factor(
        &mut self,
        keys: &TagProjectionKeys,
        camera: &CameraIntrinsics,
        tag_size: f64,
        image_corners: &[Point2d; 4],
        pixel_noise: f64,
    ) -> Result<Vec<FactorKey>>;

    /// Cheap incremental pass, returns the total error afterwards.
    fn optimize(&mut self, threshold: f64) -> Result<f64>;

    /// Batch pass over everything. Without `force` the pass may be skipped
    /// when nothing changed since the last one.
    fn optimize_full(&mut self, force: bool) -> Result<f64>;

    fn error_full(&self) -> f64;

    /// Largest error of a single factor
    fn max_error(&self) -> f64;

    fn factor_error(&self, key: FactorKey) -> Result<f64>;

    fn pose(&self, key: ValueKey) -> Result<Transform>;

    /// Marginal uncertainty of a pose variable
    fn noise(&self, key: ValueKey) -> Result<PoseNoise2>;

    /// Commits the last full optimization as the new baseline.
    fn transfer_full_optimization(&mut self);

    fn set_verbosity(&mut self, level: &str);
}
