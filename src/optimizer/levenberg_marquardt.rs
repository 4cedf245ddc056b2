#![allow(non_snake_case)]

use log::{debug, info, trace, warn};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix6, SMatrix, SVector};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::OptimizerConfig;
use crate::error::{Error, Result};
use crate::geometry::{retract, Point2d, Transform};
use crate::models::{
    tag_corners, AbsolutePoseModel, CameraIntrinsics, CornerProjectionModel, MeasurementModel,
    RelativePoseModel,
};
use crate::noise::PoseNoise2;
use crate::optimizer::{FactorKey, Optimizer, TagProjectionKeys, ValueKey};

const MAX_LAMBDA: f64 = 1e10;

#[derive(Debug)]
enum Edge {
    Relative {
        keys: [ValueKey; 2],
        model: RelativePoseModel,
        information: Matrix6<f64>,
    },
    Absolute {
        key: ValueKey,
        model: AbsolutePoseModel,
        information: Matrix6<f64>,
    },
    Projection {
        keys: [ValueKey; 4],
        model: CornerProjectionModel,
        information: Matrix2<f64>,
    },
}

impl Edge {
    fn keys(&self) -> &[ValueKey] {
        match self {
            Edge::Relative { keys, .. } => keys,
            Edge::Absolute { key, .. } => std::slice::from_ref(key),
            Edge::Projection { keys, .. } => keys,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
enum Verbosity {
    Silent,
    Summary,
    Termination,
    Lambda,
}

impl Verbosity {
    fn parse(level: &str) -> Option<Verbosity> {
        match level.to_ascii_uppercase().as_str() {
            "SILENT" | "ERROR" => Some(Verbosity::Silent),
            "SUMMARY" | "VALUES" => Some(Verbosity::Summary),
            "TERMINATION" => Some(Verbosity::Termination),
            "LAMBDA" | "TRYLAMBDA" | "DAMPED" | "TRYDAMPED" => Some(Verbosity::Lambda),
            _ => None,
        }
    }
}

/// Dense Levenberg-Marquardt over SE(3) pose variables.
///
/// Variables and factors are keyed by their insertion index. An incremental
/// pass only moves the variables touched since the previous pass, a full
/// pass moves all of them.
pub struct LevenbergMarquardt {
    config: OptimizerConfig,
    verbosity: Verbosity,
    values: Vec<Transform>,
    edges: Vec<Edge>,
    touched: Vec<ValueKey>,
    lambda: f64,
    full_error: Option<f64>,
    changed_since_full: bool,
    iteration: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        LevenbergMarquardt::new(OptimizerConfig::default())
    }
}

fn update_linear_system<const Z: usize>(
    H: &mut DMatrix<f64>,
    b: &mut DVector<f64>,
    e: &SVector<f64, Z>,
    jacobians: &[(usize, SMatrix<f64, Z, 6>)],
    omega: &SMatrix<f64, Z, Z>,
) {
    for (i, A) in jacobians {
        let b_i = A.transpose() * omega * e;
        let mut v = b.fixed_view_mut::<6, 1>(*i, 0);
        v += b_i;
        for (j, B) in jacobians {
            let H_ij = A.transpose() * omega * B;
            // assignment operators do not work on views, go through a binding
            let mut v = H.fixed_view_mut::<6, 6>(*i, *j);
            v += H_ij;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn accumulate<M: MeasurementModel<Z>, const Z: usize>(
    model: &M,
    keys: &[ValueKey],
    omega: &SMatrix<f64, Z, Z>,
    values: &[Transform],
    lut: &FxHashMap<ValueKey, usize>,
    step: f64,
    H: &mut DMatrix<f64>,
    b: &mut DVector<f64>,
) {
    debug_assert_eq!(M::POSES, keys.len());
    if !keys.iter().any(|k| lut.contains_key(k)) {
        return;
    }
    let poses: Vec<Transform> = keys.iter().map(|k| values[*k as usize]).collect();
    let e = model.residual(&poses);
    let jacobians: Vec<(usize, SMatrix<f64, Z, 6>)> = keys
        .iter()
        .enumerate()
        .filter_map(|(which, k)| lut.get(k).map(|offset| (*offset, model.jacobian(&poses, which, step))))
        .collect();
    update_linear_system(H, b, &e, &jacobians, omega);
}

fn weighted_error<M: MeasurementModel<Z>, const Z: usize>(
    model: &M,
    keys: &[ValueKey],
    omega: &SMatrix<f64, Z, Z>,
    values: &[Transform],
) -> f64 {
    let poses: Vec<Transform> = keys.iter().map(|k| values[*k as usize]).collect();
    let e = model.residual(&poses);
    e.dot(&(omega * e))
}

fn edge_error(edge: &Edge, values: &[Transform]) -> f64 {
    match edge {
        Edge::Relative {
            keys,
            model,
            information,
        } => weighted_error(model, keys, information, values),
        Edge::Absolute {
            key,
            model,
            information,
        } => weighted_error(model, &[*key], information, values),
        Edge::Projection {
            keys,
            model,
            information,
        } => weighted_error(model, keys, information, values),
    }
}

fn solve_dense(H: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let rhs = -b;
    let dx = match H.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => H.lu().solve(&rhs).ok_or(Error::SingularSystem)?,
    };
    if dx.iter().all(|v| v.is_finite()) {
        Ok(dx)
    } else {
        Err(Error::SingularSystem)
    }
}

impl LevenbergMarquardt {
    pub fn new(config: OptimizerConfig) -> LevenbergMarquardt {
        let verbosity = Verbosity::parse(&config.verbosity).unwrap_or(Verbosity::Silent);
        LevenbergMarquardt {
            lambda: config.initial_lambda,
            config,
            verbosity,
            values: Vec::new(),
            edges: Vec::new(),
            touched: Vec::new(),
            full_error: None,
            changed_since_full: true,
            iteration: 0,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn num_variables(&self) -> usize {
        self.values.len()
    }

    pub fn num_factors(&self) -> usize {
        self.edges.len()
    }

    fn check_key(&self, key: ValueKey) -> Result<()> {
        if (key as usize) < self.values.len() {
            Ok(())
        } else {
            Err(Error::UnknownKey(key))
        }
    }

    fn touch(&mut self, keys: &[ValueKey]) {
        for k in keys {
            if !self.touched.contains(k) {
                self.touched.push(*k);
            }
        }
        self.changed_since_full = true;
    }

    /// Variables linked to `key` through factors, `key` first.
    fn component(&self, key: ValueKey) -> Vec<ValueKey> {
        let mut members = vec![key];
        let mut seen: FxHashSet<ValueKey> = FxHashSet::default();
        seen.insert(key);
        let mut next = 0;
        while next < members.len() {
            let current = members[next];
            next += 1;
            for edge in self.edges.iter().filter(|e| e.keys().contains(&current)) {
                for k in edge.keys() {
                    if seen.insert(*k) {
                        members.push(*k);
                    }
                }
            }
        }
        members
    }

    fn push_edge(&mut self, edge: Edge) -> FactorKey {
        self.edges.push(edge);
        (self.edges.len() - 1) as FactorKey
    }

    fn build_linear_system(
        &self,
        lut: &FxHashMap<ValueKey, usize>,
        lambda: f64,
    ) -> (DMatrix<f64>, DVector<f64>) {
        let n = 6 * lut.len();
        let mut H = DMatrix::zeros(n, n);
        let mut b = DVector::zeros(n);
        let step = self.config.jacobian_step;

        for edge in &self.edges {
            match edge {
                Edge::Relative {
                    keys,
                    model,
                    information,
                } => accumulate(model, keys, information, &self.values, lut, step, &mut H, &mut b),
                Edge::Absolute {
                    key,
                    model,
                    information,
                } => accumulate(model, &[*key], information, &self.values, lut, step, &mut H, &mut b),
                Edge::Projection {
                    keys,
                    model,
                    information,
                } => accumulate(model, keys, information, &self.values, lut, step, &mut H, &mut b),
            }
        }
        for i in 0..n {
            H[(i, i)] += lambda;
        }
        (H, b)
    }

    fn update_nodes(&mut self, active: &[ValueKey], dx: &DVector<f64>) {
        for (idx, key) in active.iter().enumerate() {
            let delta = dx.fixed_rows::<6>(6 * idx).into_owned();
            let node = &mut self.values[*key as usize];
            *node = retract(node, &delta);
        }
    }

    /// Levenberg-Marquardt on the `active` variables, the others stay fixed.
    /// Stops when an accepted step lowers the error by less than `threshold`,
    /// when the step norm drops below the tolerance, or after `max_iterations`.
    fn run(&mut self, active: &[ValueKey], max_iterations: usize, threshold: f64) -> Result<f64> {
        let mut last_error = self.error_full();
        if active.is_empty() || self.edges.is_empty() {
            return Ok(last_error);
        }
        let lut: FxHashMap<ValueKey, usize> = active
            .iter()
            .enumerate()
            .map(|(idx, key)| (*key, 6 * idx))
            .collect();
        let initial_error = last_error;
        let mut iterations = 0;

        for i in 0..max_iterations {
            self.iteration += 1;
            iterations = i + 1;
            let (H, b) = self.build_linear_system(&lut, self.lambda);
            let dx = solve_dense(H, &b)?;
            let norm_dx = dx.norm();
            if norm_dx < self.config.tolerance {
                break;
            }
            let backup: Vec<Transform> = active.iter().map(|k| self.values[*k as usize]).collect();
            self.update_nodes(active, &dx);
            let error = self.error_full();

            if self.verbosity >= Verbosity::Lambda {
                info!(
                    "step {i:3} : |dx| = {norm_dx:3.5}, error = {error:3.5}, lambda = {:.3e}",
                    self.lambda
                );
            } else {
                trace!("step {i:3} : |dx| = {norm_dx:3.5}, error = {error:3.5}");
            }

            if error > last_error {
                // get back old state
                for (key, old) in active.iter().zip(backup) {
                    self.values[*key as usize] = old;
                }
                self.lambda *= 2.0;
                if self.lambda > MAX_LAMBDA {
                    break;
                }
                continue;
            }
            self.lambda = (self.lambda / 2.0).max(f64::EPSILON);
            let decrease = last_error - error;
            last_error = error;
            if decrease < threshold {
                break;
            }
        }

        if self.verbosity >= Verbosity::Summary {
            info!(
                "optimized {} variables in {iterations} iterations, error {initial_error:.5} -> {last_error:.5}",
                active.len()
            );
        } else {
            debug!(
                "optimized {} variables in {iterations} iterations, error {initial_error:.5} -> {last_error:.5}",
                active.len()
            );
        }
        Ok(last_error)
    }
}

impl Optimizer for LevenbergMarquardt {
    fn add_pose_variable(&mut self, initial_guess: &Transform) -> ValueKey {
        self.values.push(*initial_guess);
        let key = (self.values.len() - 1) as ValueKey;
        self.touch(&[key]);
        key
    }

    fn add_relative_pose_prior_factor(
        &mut self,
        key_a: ValueKey,
        key_b: ValueKey,
        measurement: &Transform,
        noise: &PoseNoise2,
    ) -> Result<FactorKey> {
        self.check_key(key_a)?;
        self.check_key(key_b)?;
        let information = noise.information()?;
        self.touch(&[key_a, key_b]);
        Ok(self.push_edge(Edge::Relative {
            keys: [key_a, key_b],
            model: RelativePoseModel {
                measurement: *measurement,
            },
            information,
        }))
    }

    fn add_absolute_pose_prior_factor(
        &mut self,
        key: ValueKey,
        measurement: &Transform,
        noise: &PoseNoise2,
    ) -> Result<FactorKey> {
        self.check_key(key)?;
        let information = noise.information()?;
        self.touch(&[key]);
        Ok(self.push_edge(Edge::Absolute {
            key,
            model: AbsolutePoseModel {
                measurement: *measurement,
            },
            information,
        }))
    }

    fn add_tag_projection_factor(
        &mut self,
        keys: &TagProjectionKeys,
        camera: &CameraIntrinsics,
        tag_size: f64,
        image_corners: &[Point2d; 4],
        pixel_noise: f64,
    ) -> Result<Vec<FactorKey>> {
        let keys = keys.as_array();
        for k in keys {
            self.check_key(k)?;
        }
        if pixel_noise <= 0.0 {
            return Err(Error::SingularSystem);
        }
        let information = Matrix2::identity() / (pixel_noise * pixel_noise);
        self.touch(&keys);
        let factor_keys = tag_corners(tag_size)
            .iter()
            .zip(image_corners)
            .map(|(corner, pixel)| {
                self.push_edge(Edge::Projection {
                    keys,
                    model: CornerProjectionModel {
                        camera: *camera,
                        corner: *corner,
                        pixel: *pixel,
                    },
                    information,
                })
            })
            .collect();
        Ok(factor_keys)
    }

    fn optimize(&mut self, threshold: f64) -> Result<f64> {
        let active = std::mem::take(&mut self.touched);
        let max_iterations = self.config.max_iterations_incremental;
        match self.run(&active, max_iterations, threshold) {
            Ok(error) => {
                if !active.is_empty() {
                    self.full_error = None;
                }
                Ok(error)
            }
            Err(e) => {
                // keep the variables pending for the next pass
                self.touched = active;
                Err(e)
            }
        }
    }

    fn optimize_full(&mut self, force: bool) -> Result<f64> {
        if !force && !self.changed_since_full {
            if let Some(error) = self.full_error {
                return Ok(error);
            }
        }
        let active: Vec<ValueKey> = (0..self.values.len() as ValueKey).collect();
        let max_iterations = self.config.max_iterations_full;
        let error = self.run(&active, max_iterations, 0.0)?;
        self.full_error = Some(error);
        self.changed_since_full = false;
        self.touched.clear();
        Ok(error)
    }

    fn error_full(&self) -> f64 {
        self.edges
            .iter()
            .map(|edge| edge_error(edge, &self.values))
            .sum()
    }

    fn max_error(&self) -> f64 {
        self.edges
            .iter()
            .map(|edge| edge_error(edge, &self.values))
            .fold(0.0, f64::max)
    }

    fn factor_error(&self, key: FactorKey) -> Result<f64> {
        self.edges
            .get(key as usize)
            .map(|edge| edge_error(edge, &self.values))
            .ok_or(Error::UnknownKey(key))
    }

    fn pose(&self, key: ValueKey) -> Result<Transform> {
        self.values
            .get(key as usize)
            .copied()
            .ok_or(Error::UnknownKey(key))
    }

    fn noise(&self, key: ValueKey) -> Result<PoseNoise2> {
        self.check_key(key)?;
        // only the variables sharing factors with `key` enter its marginal
        let lut: FxHashMap<ValueKey, usize> = self
            .component(key)
            .iter()
            .enumerate()
            .map(|(idx, k)| (*k, 6 * idx))
            .collect();
        let (H, _) = self.build_linear_system(&lut, 0.0);
        let covariance = H
            .cholesky()
            .ok_or(Error::SingularSystem)?
            .inverse();
        let block: Matrix6<f64> = covariance.fixed_view::<6, 6>(0, 0).into_owned();
        Ok(PoseNoise2::from_covariance(block))
    }

    fn transfer_full_optimization(&mut self) {
        self.touched.clear();
        self.lambda = self.config.initial_lambda;
    }

    fn set_verbosity(&mut self, level: &str) {
        match Verbosity::parse(level) {
            Some(v) => self.verbosity = v,
            None => warn!("unknown optimizer verbosity: {level}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{make_transform, Point3d};
    use std::error::Error;

    fn tf(r: [f64; 3], p: [f64; 3]) -> Transform {
        make_transform(&Point3d::from(r), &Point3d::from(p))
    }

    #[test]
    fn absolute_prior_pulls_pose() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let key = opt.add_pose_variable(&tf([0.1, -0.1, 0.2], [0.5, 0.5, 0.5]));
        let z = tf([0.0, 0.0, 0.3], [1.0, 2.0, 3.0]);
        opt.add_absolute_pose_prior_factor(key, &z, &PoseNoise2::make_scalar(0.01, 0.01))?;
        let error = opt.optimize(1e-12)?;
        approx::assert_abs_diff_eq!(0.0, error, epsilon = 1e-8);
        approx::assert_abs_diff_eq!(z.to_homogeneous(), opt.pose(key)?.to_homogeneous(), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn chain_of_relative_priors() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let noise = PoseNoise2::make_scalar(0.01, 0.01);
        let a = opt.add_pose_variable(&Transform::identity());
        let b = opt.add_pose_variable(&Transform::identity());
        let c = opt.add_pose_variable(&Transform::identity());
        let z = tf([0.0, 0.0, 0.5], [1.0, 0.0, 0.0]);
        opt.add_absolute_pose_prior_factor(a, &Transform::identity(), &noise)?;
        opt.add_relative_pose_prior_factor(a, b, &z, &noise)?;
        opt.add_relative_pose_prior_factor(b, c, &z, &noise)?;
        let error = opt.optimize_full(true)?;
        approx::assert_abs_diff_eq!(0.0, error, epsilon = 1e-8);
        approx::assert_abs_diff_eq!(
            (z * z).to_homogeneous(),
            opt.pose(c)?.to_homogeneous(),
            epsilon = 1e-6
        );
        Ok(())
    }

    #[test]
    fn incremental_pass_keeps_old_variables_fixed() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let noise = PoseNoise2::make_scalar(0.1, 0.1);
        let a = opt.add_pose_variable(&Transform::identity());
        opt.add_absolute_pose_prior_factor(a, &Transform::identity(), &noise)?;
        opt.optimize(0.0)?;

        let b = opt.add_pose_variable(&Transform::identity());
        let z = tf([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        opt.add_relative_pose_prior_factor(a, b, &z, &noise)?;
        // a is touched again by the new factor, so both move
        opt.optimize(0.0)?;
        approx::assert_abs_diff_eq!(z.to_homogeneous(), opt.pose(b)?.to_homogeneous(), epsilon = 1e-6);

        // nothing touched: an incremental pass leaves everything in place
        let before = opt.pose(b)?;
        opt.optimize(0.0)?;
        assert_eq!(before, opt.pose(b)?);
        Ok(())
    }

    #[test]
    fn noise_of_anchored_pose() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let key = opt.add_pose_variable(&Transform::identity());
        opt.add_absolute_pose_prior_factor(key, &Transform::identity(), &PoseNoise2::make_scalar(0.1, 0.2))?;
        opt.optimize(0.0)?;
        let noise = opt.noise(key)?;
        assert!(!noise.is_diagonal);
        approx::assert_abs_diff_eq!(0.01, noise.noise[(0, 0)], epsilon = 1e-6);
        approx::assert_abs_diff_eq!(0.04, noise.noise[(5, 5)], epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn noise_ignores_unconstrained_variables() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let noise = PoseNoise2::make_scalar(0.1, 0.2);
        let a = opt.add_pose_variable(&Transform::identity());
        let b = opt.add_pose_variable(&tf([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]));
        opt.add_absolute_pose_prior_factor(a, &Transform::identity(), &noise)?;
        opt.add_relative_pose_prior_factor(a, b, &tf([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]), &noise)?;
        let before = opt.noise(b)?;
        let loose = opt.add_pose_variable(&Transform::identity());
        approx::assert_abs_diff_eq!(before.noise, opt.noise(b)?.noise, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(0.01, opt.noise(a)?.noise[(0, 0)], epsilon = 1e-6);
        // b inherits the uncertainty of a plus its own prior
        assert!(before.noise[(3, 3)] > opt.noise(a)?.noise[(3, 3)]);
        assert!(matches!(opt.noise(loose), Err(crate::error::Error::SingularSystem)));
        Ok(())
    }

    #[test]
    fn failed_pass_keeps_variables_pending() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let key = opt.add_pose_variable(&Transform::identity());
        let broken = tf([0.0, 0.0, 0.0], [f64::NAN, 0.0, 0.0]);
        opt.add_absolute_pose_prior_factor(key, &broken, &PoseNoise2::make_scalar(0.1, 0.1))?;
        assert!(opt.optimize(0.0).is_err());
        assert_eq!(vec![key], opt.touched);
        assert!(opt.optimize(0.0).is_err());
        Ok(())
    }

    #[test]
    fn incremental_pass_after_full_pass_is_free() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let noise = PoseNoise2::make_scalar(0.1, 0.1);
        let a = opt.add_pose_variable(&tf([0.0, 0.0, 0.1], [0.2, 0.0, 0.0]));
        opt.add_absolute_pose_prior_factor(a, &Transform::identity(), &noise)?;
        let full = opt.optimize_full(true)?;
        let iterations = opt.iteration;
        approx::assert_abs_diff_eq!(full, opt.optimize(0.0)?, epsilon = 1e-12);
        assert_eq!(iterations, opt.iteration);

        // new data moves values incrementally, the cached full error is dropped
        let b = opt.add_pose_variable(&Transform::identity());
        opt.add_relative_pose_prior_factor(a, b, &tf([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]), &noise)?;
        opt.optimize(0.0)?;
        assert_eq!(None, opt.full_error);
        opt.optimize_full(false)?;
        assert!(opt.iteration > iterations);
        Ok(())
    }

    #[test]
    fn unknown_keys_rejected() {
        let mut opt = LevenbergMarquardt::default();
        let noise = PoseNoise2::make_scalar(0.1, 0.1);
        assert!(matches!(
            opt.add_absolute_pose_prior_factor(3, &Transform::identity(), &noise),
            Err(crate::error::Error::UnknownKey(3))
        ));
        assert!(opt.pose(0).is_err());
        assert!(opt.factor_error(0).is_err());
    }

    #[test]
    fn full_pass_skipped_without_changes() -> std::result::Result<(), Box<dyn Error>> {
        let mut opt = LevenbergMarquardt::default();
        let key = opt.add_pose_variable(&tf([0.0, 0.0, 0.1], [0.0, 0.0, 0.0]));
        opt.add_absolute_pose_prior_factor(key, &Transform::identity(), &PoseNoise2::make_scalar(0.1, 0.1))?;
        let first = opt.optimize_full(false)?;
        let iterations = opt.iteration;
        let second = opt.optimize_full(false)?;
        assert_eq!(iterations, opt.iteration);
        assert_eq!(first, second);
        Ok(())
    }
}
