use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::ops::Index;

use crate::error::{Error, Result};
use crate::geometry::Transform;
use crate::mapping::factor::{AbsolutePosePriorFactor, RelativePosePriorFactor, TagProjectionFactor};
use crate::mapping::identifier_index::{self, make_id, IdentifierIndex};
use crate::mapping::key_tracker::KeyTracker;
use crate::mapping::vertex::{PoseValue, Vertex, VertexDesc, VertexId};
use crate::noise::PoseNoise2;
use crate::optimizer::{
    FactorKey, LevenbergMarquardt, Optimizer, OptimizerKey, TagProjectionKeys, ValueKey,
};
use crate::time::Time;

/// Factor graph of poses and measurements, plus the bookkeeping that ties
/// each vertex to the keys the optimizer gave it.
///
/// Vertices live in a single arena and are never removed. Topology is kept
/// as an adjacency list: a factor is adjacent to the values it constrains
/// and vice versa.
pub struct Graph<O: Optimizer = LevenbergMarquardt> {
    vertices: Vec<Vertex>,
    adjacency: Vec<Vec<VertexDesc>>,
    factors: Vec<VertexDesc>,
    index: IdentifierIndex,
    optimized: KeyTracker,
    optimizer: O,
}

impl Graph<LevenbergMarquardt> {
    pub fn new() -> Self {
        Graph::with_optimizer(LevenbergMarquardt::default())
    }
}

impl Default for Graph<LevenbergMarquardt> {
    fn default() -> Self {
        Graph::new()
    }
}

/// Panics if `v` is not a handle of this graph, [`Graph::vertex`] is the
/// checked lookup.
impl<O: Optimizer> Index<VertexDesc> for Graph<O> {
    type Output = Vertex;

    fn index(&self, v: VertexDesc) -> &Vertex {
        &self.vertices[v.index()]
    }
}

impl<O: Optimizer> Graph<O> {
    pub fn with_optimizer(optimizer: O) -> Self {
        Graph {
            vertices: Vec::new(),
            adjacency: Vec::new(),
            factors: Vec::new(),
            index: IdentifierIndex::new(),
            optimized: KeyTracker::new(),
            optimizer,
        }
    }

    // ------ naming ------

    pub fn tag_name(tag_id: u32) -> String {
        identifier_index::tag_name(tag_id)
    }

    pub fn body_name(body: &str) -> String {
        identifier_index::body_name(body)
    }

    pub fn cam_name(cam: &str) -> String {
        identifier_index::cam_name(cam)
    }

    // ------ lookup ------

    pub fn is_valid(&self, v: VertexDesc) -> bool {
        v.index() < self.vertices.len()
    }

    pub fn has_id(&self, id: &VertexId) -> bool {
        self.index.contains(id)
    }

    pub fn find(&self, id: &VertexId) -> Option<VertexDesc> {
        self.index.find(id)
    }

    pub fn has_pose(&self, t: Time, name: &str) -> bool {
        self.has_id(&make_id(t, name))
    }

    pub fn find_pose(&self, t: Time, name: &str) -> Option<VertexDesc> {
        self.find(&make_id(t, name))
    }

    pub fn vertex(&self, v: VertexDesc) -> Option<&Vertex> {
        self.vertices.get(v.index())
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Handles of all vertices, in insertion order.
    pub fn vertex_descs(&self) -> impl Iterator<Item = VertexDesc> {
        (0..self.vertices.len()).map(VertexDesc::new)
    }

    /// Factor vertices in insertion order
    pub fn factors(&self) -> &[VertexDesc] {
        &self.factors
    }

    /// Vertices directly adjacent to `v`.
    pub fn connected(&self, v: VertexDesc) -> Vec<VertexDesc> {
        self.adjacency
            .get(v.index())
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_optimized(&self, v: VertexDesc) -> bool {
        self.optimized.is_optimized(v)
    }

    /// Optimizer keys of a submitted vertex
    pub fn keys(&self, v: VertexDesc) -> Option<&[OptimizerKey]> {
        self.optimized.keys_for(v)
    }

    /// Read-only access for diagnostics
    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    fn get(&self, v: VertexDesc) -> Result<&Vertex> {
        self.vertex(v).ok_or(Error::InvalidVertex(v))
    }

    fn value_key(&self, v: VertexDesc) -> Option<ValueKey> {
        self.optimized.keys_for(v).and_then(|k| k.first().copied())
    }

    fn verify_unoptimized(&self, v: VertexDesc) -> Result<()> {
        if self.is_optimized(v) {
            return Err(Error::AlreadyOptimized(self.info(v)));
        }
        Ok(())
    }

    fn find_optimized_pose_key(&self, v: VertexDesc) -> Result<ValueKey> {
        let vertex = self.get(v)?;
        if !vertex.is_value() {
            return Err(Error::WrongVertexKind {
                expected: "pose",
                found: vertex.kind(),
            });
        }
        self.value_key(v)
            .ok_or_else(|| Error::NotOptimized(self.info(v)))
    }

    // ------ insertion ------

    fn insert_vertex(&mut self, vertex: Vertex) -> Result<VertexDesc> {
        let v = VertexDesc::new(self.vertices.len());
        self.index.insert(vertex.id(), v)?;
        let mut neighbors: Vec<VertexDesc> = Vec::new();
        for e in vertex.endpoints() {
            if !neighbors.contains(e) {
                neighbors.push(*e);
            }
        }
        for e in &neighbors {
            self.adjacency[e.index()].push(v);
        }
        if vertex.is_factor() {
            self.factors.push(v);
        }
        debug!("added vertex {v}: {vertex}");
        self.vertices.push(vertex);
        self.adjacency.push(neighbors);
        Ok(v)
    }

    /// Inserts a vertex. Factor endpoints must already be value vertices of
    /// this graph and factor noise must be valid.
    pub fn add(&mut self, vertex: Vertex) -> Result<VertexDesc> {
        vertex.check_noise()?;
        for e in vertex.endpoints() {
            let is_value = self.vertex(*e).map(|ev| ev.is_value()).unwrap_or(false);
            if !is_value {
                return Err(Error::DanglingReference {
                    factor: vertex.id(),
                    endpoint: e.to_string(),
                });
            }
        }
        self.insert_vertex(vertex)
    }

    pub fn add_pose_value(&mut self, p: PoseValue) -> Result<VertexDesc> {
        self.add(p.into())
    }

    pub fn add_relative_pose_prior(&mut self, f: RelativePosePriorFactor) -> Result<VertexDesc> {
        self.add(f.into())
    }

    pub fn add_absolute_pose_prior(&mut self, f: AbsolutePosePriorFactor) -> Result<VertexDesc> {
        self.add(f.into())
    }

    pub fn add_tag_projection(&mut self, f: TagProjectionFactor) -> Result<VertexDesc> {
        self.add(f.into())
    }

    /// Adds a pose value. Fails if a pose of that name already exists at `t`,
    /// check with [`Graph::has_pose`] first.
    pub fn add_pose(&mut self, t: Time, name: &str, is_cam_pose: bool) -> Result<VertexDesc> {
        self.add_pose_value(PoseValue::new(t, name, is_cam_pose))
    }

    // ------ submission to the optimizer ------

    /// Hands a pose value to the optimizer with an initial guess.
    pub fn add_value_to_optimizer(&mut self, v: VertexDesc, tf: &Transform) -> Result<ValueKey> {
        let vertex = self.get(v)?;
        if !vertex.is_value() {
            return Err(Error::WrongVertexKind {
                expected: "pose",
                found: vertex.kind(),
            });
        }
        self.verify_unoptimized(v)?;
        let key = self.optimizer.add_pose_variable(tf);
        self.optimized.record_keys(v, vec![key])?;
        debug!("optimizer key {key} for {}", self.info(v));
        Ok(key)
    }

    /// Key of a value, submitting it with `guess` first if needed.
    fn ensure_value_key(&mut self, v: VertexDesc, guess: impl FnOnce() -> Transform) -> Result<ValueKey> {
        match self.value_key(v) {
            Some(key) => Ok(key),
            None => self.add_value_to_optimizer(v, &guess()),
        }
    }

    /// Checks run before any endpoint of `f` is handed to the optimizer.
    fn verify_factor(&self, f: VertexDesc) -> Result<()> {
        self.get(f)?.check_noise()?;
        self.verify_unoptimized(f)
    }

    /// Initial poses for the four endpoints of a tag projection. Submitted
    /// endpoints keep their current estimate. The tag pose measured from the
    /// corners fills the first missing one of `T_b_o, T_w_b, T_w_r, T_r_c`,
    /// any other missing endpoint starts at identity.
    fn tag_projection_guesses(&self, f: VertexDesc, factor: &TagProjectionFactor) -> Result<[Transform; 4]> {
        let mut poses = [Transform::identity(); 4];
        let mut missing = Vec::new();
        for (i, v) in factor.poses.iter().enumerate() {
            match self.value_key(*v) {
                Some(key) => poses[i] = self.optimizer.pose(key)?,
                None => missing.push(i),
            }
        }
        let Some(solve_for) = missing.iter().copied().max() else {
            return Ok(poses);
        };
        for i in missing.iter().filter(|i| **i != solve_for) {
            warn!("{} has no initial pose, starting from identity", self.info(factor.poses[*i]));
        }
        let Some(t_c_o) = factor
            .camera
            .tag_pose_from_corners(&factor.image_corners, factor.tag_size)
        else {
            warn!("degenerate corners in {}, starting from identity", self.info(f));
            return Ok(poses);
        };
        let [t_r_c, t_w_r, t_w_b, t_b_o] = poses;
        poses[solve_for] = match solve_for {
            3 => t_w_b.inverse() * t_w_r * t_r_c * t_c_o,
            2 => t_w_r * t_r_c * t_c_o * t_b_o.inverse(),
            1 => t_w_b * t_b_o * t_c_o.inverse() * t_r_c.inverse(),
            _ => t_w_r.inverse() * t_w_b * t_b_o * t_c_o.inverse(),
        };
        Ok(poses)
    }

    pub fn add_relative_pose_prior_to_optimizer(&mut self, f: VertexDesc) -> Result<FactorKey> {
        self.verify_factor(f)?;
        let Vertex::RelativePosePrior(factor) = self[f].clone() else {
            return Err(Error::WrongVertexKind {
                expected: "relative_pose_prior",
                found: self[f].kind(),
            });
        };
        let z = factor.prior.pose;
        let [prev, cur] = factor.poses;
        let (key_prev, key_cur) = match (self.value_key(prev), self.value_key(cur)) {
            (Some(kp), Some(kc)) => (kp, kc),
            (Some(kp), None) => {
                let guess = self.optimizer.pose(kp)? * z;
                (kp, self.add_value_to_optimizer(cur, &guess)?)
            }
            (None, Some(kc)) => {
                let guess = self.optimizer.pose(kc)? * z.inverse();
                (self.add_value_to_optimizer(prev, &guess)?, kc)
            }
            (None, None) => {
                warn!("no initial pose for either end of {}", self.info(f));
                let kp = self.add_value_to_optimizer(prev, &Transform::identity())?;
                let kc = self.ensure_value_key(cur, || z)?;
                (kp, kc)
            }
        };
        let key = self.optimizer.add_relative_pose_prior_factor(
            key_prev,
            key_cur,
            &z,
            &factor.prior.noise,
        )?;
        self.optimized.record_keys(f, vec![key])?;
        Ok(key)
    }

    pub fn add_absolute_pose_prior_to_optimizer(&mut self, f: VertexDesc) -> Result<FactorKey> {
        self.verify_factor(f)?;
        let Vertex::AbsolutePosePrior(factor) = self[f].clone() else {
            return Err(Error::WrongVertexKind {
                expected: "absolute_pose_prior",
                found: self[f].kind(),
            });
        };
        let value_key = self.ensure_value_key(factor.pose, || factor.prior.pose)?;
        let key = self.optimizer.add_absolute_pose_prior_factor(
            value_key,
            &factor.prior.pose,
            &factor.prior.noise,
        )?;
        self.optimized.record_keys(f, vec![key])?;
        Ok(key)
    }

    pub fn add_tag_projection_to_optimizer(&mut self, f: VertexDesc) -> Result<Vec<FactorKey>> {
        self.verify_factor(f)?;
        let Vertex::TagProjection(factor) = self[f].clone() else {
            return Err(Error::WrongVertexKind {
                expected: "tag_projection",
                found: self[f].kind(),
            });
        };
        let guesses = self.tag_projection_guesses(f, &factor)?;
        let mut value_keys = [0; 4];
        // the endpoint solved from the corners goes first
        for i in (0..4).rev() {
            value_keys[i] = self.ensure_value_key(factor.poses[i], || guesses[i])?;
        }
        let [t_r_c, t_w_r, t_w_b, t_b_o] = value_keys;
        let keys = self.optimizer.add_tag_projection_factor(
            &TagProjectionKeys {
                t_r_c,
                t_w_r,
                t_w_b,
                t_b_o,
            },
            &factor.camera,
            factor.tag_size,
            &factor.image_corners,
            factor.pixel_noise,
        )?;
        self.optimized.record_keys(f, keys.clone())?;
        Ok(keys)
    }

    /// Submits any kind of factor, returns its keys.
    pub fn add_factor_to_optimizer(&mut self, f: VertexDesc) -> Result<Vec<FactorKey>> {
        match self.get(f)? {
            Vertex::RelativePosePrior(_) => Ok(vec![self.add_relative_pose_prior_to_optimizer(f)?]),
            Vertex::AbsolutePosePrior(_) => Ok(vec![self.add_absolute_pose_prior_to_optimizer(f)?]),
            Vertex::TagProjection(_) => self.add_tag_projection_to_optimizer(f),
            Vertex::Pose(_) => Err(Error::WrongVertexKind {
                expected: "factor",
                found: "pose",
            }),
        }
    }

    // ------ optimization ------

    pub fn optimize(&mut self, threshold: f64) -> Result<f64> {
        self.optimizer.optimize(threshold)
    }

    pub fn optimize_full(&mut self, force: bool) -> Result<f64> {
        self.optimizer.optimize_full(force)
    }

    pub fn transfer_full_optimization(&mut self) {
        self.optimizer.transfer_full_optimization();
    }

    pub fn set_verbosity(&mut self, level: &str) {
        self.optimizer.set_verbosity(level);
    }

    pub fn optimized_pose(&self, v: VertexDesc) -> Result<Transform> {
        let key = self.find_optimized_pose_key(v)?;
        self.optimizer.pose(key)
    }

    pub fn pose(&self, v: VertexDesc) -> Result<Transform> {
        self.optimized_pose(v)
    }

    pub fn pose_noise(&self, v: VertexDesc) -> Result<PoseNoise2> {
        let key = self.find_optimized_pose_key(v)?;
        self.optimizer.noise(key)
    }

    /// Total error of the whole problem
    pub fn error(&self) -> f64 {
        self.optimizer.error_full()
    }

    pub fn max_error(&self) -> f64 {
        self.optimizer.max_error()
    }

    /// Current error of a submitted factor, summed over its sub factors.
    pub fn factor_error(&self, f: VertexDesc) -> Result<f64> {
        let keys = self
            .optimized
            .keys_for(f)
            .ok_or_else(|| Error::NotOptimized(self.info(f)))?;
        let mut error = 0.0;
        for key in keys {
            error += self.optimizer.factor_error(*key)?;
        }
        Ok(error)
    }

    // ------ subgraphs ------

    /// Copies the vertices `vsrc` of `other` into this graph. Values come
    /// first, then factors with their endpoints translated to local handles.
    /// Vertices whose id is already present are reused. Every factor
    /// endpoint must be in `vsrc` or already in this graph, otherwise
    /// nothing is copied.
    pub fn copy_from<P: Optimizer>(&mut self, other: &Graph<P>, vsrc: &[VertexDesc]) -> Result<()> {
        let selected: FxHashSet<VertexDesc> = vsrc.iter().copied().collect();
        for src in vsrc {
            let vertex = other.get(*src)?;
            for e in vertex.endpoints() {
                let endpoint = other.get(*e)?;
                if !selected.contains(e) && !self.has_id(&endpoint.id()) {
                    return Err(Error::DanglingReference {
                        factor: vertex.id(),
                        endpoint: endpoint.id().to_string(),
                    });
                }
            }
        }

        let mut translation: FxHashMap<VertexDesc, VertexDesc> = FxHashMap::default();
        for src in vsrc {
            let vertex = &other[*src];
            if !vertex.is_value() {
                continue;
            }
            let dest = match self.find(&vertex.id()) {
                Some(dest) => dest,
                None => self.insert_vertex(vertex.clone())?,
            };
            translation.insert(*src, dest);
        }

        for src in vsrc {
            let vertex = &other[*src];
            if !vertex.is_factor() || self.has_id(&vertex.id()) {
                continue;
            }
            let copy = vertex.remap(|e| match translation.get(&e) {
                Some(dest) => Ok(*dest),
                None => {
                    let id = other[e].id();
                    self.find(&id).ok_or(Error::DanglingReference {
                        factor: vertex.id(),
                        endpoint: id.to_string(),
                    })
                }
            })?;
            self.add(copy)?;
        }
        debug!("copied {} vertices, graph now has {}", vsrc.len(), self.num_vertices());
        Ok(())
    }

    /// Warm start from a graph sharing ids with this one: values optimized
    /// there but not here are submitted with their optimized pose, then the
    /// factors optimized there but not here are submitted.
    pub fn initialize_from<P: Optimizer>(&mut self, other: &Graph<P>) -> Result<()> {
        for src in other.vertex_descs() {
            if !other[src].is_value() || !other.is_optimized(src) {
                continue;
            }
            if let Some(dest) = self.find(&other[src].id()) {
                if !self.is_optimized(dest) {
                    let pose = other.optimized_pose(src)?;
                    self.add_value_to_optimizer(dest, &pose)?;
                }
            }
        }
        for src in other.factors() {
            if !other.is_optimized(*src) {
                continue;
            }
            if let Some(dest) = self.find(&other[*src].id()) {
                if !self.is_optimized(dest) {
                    self.add_factor_to_optimizer(dest)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{make_transform, Point2d, Point3d};
    use crate::models::CameraIntrinsics;
    use crate::noise::PoseWithNoise;
    use std::error::Error as StdError;

    fn prior(pose: Transform) -> PoseWithNoise {
        PoseWithNoise::new(pose, PoseNoise2::make_scalar(0.01, 0.01), true)
    }

    #[test]
    fn add_pose_rejects_duplicates() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let t = Time::from_nsec(10);
        let v = graph.add_pose(t, &Graph::<LevenbergMarquardt>::body_name("rig"), false)?;
        assert!(graph.is_valid(v));
        assert!(graph.has_pose(t, "body:rig"));
        assert_eq!(Some(v), graph.find_pose(t, "body:rig"));
        assert!(matches!(
            graph.add_pose(t, "body:rig", true),
            Err(Error::DuplicateVertex(_))
        ));
        assert_eq!(1, graph.num_vertices());
        assert_eq!(None, graph.find_pose(Time::from_nsec(11), "body:rig"));
        Ok(())
    }

    #[test]
    fn dangling_factor_rejected() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let a = graph.add_pose(Time::ZERO, "body:a", false)?;
        let f = AbsolutePosePriorFactor::new(Time::ZERO, "body:a", prior(Transform::identity()), VertexDesc::new(7));
        assert!(matches!(
            graph.add_absolute_pose_prior(f),
            Err(Error::DanglingReference { .. })
        ));
        // a factor is not a valid endpoint either
        let fa = graph.add_absolute_pose_prior(AbsolutePosePriorFactor::new(
            Time::ZERO,
            "body:a",
            prior(Transform::identity()),
            a,
        ))?;
        let bad = RelativePosePriorFactor::new(Time::ZERO, Time::ZERO, "x", prior(Transform::identity()), a, fa);
        assert!(graph.add_relative_pose_prior(bad).is_err());
        assert_eq!(&[fa], graph.factors());
        Ok(())
    }

    #[test]
    #[should_panic]
    fn index_panics_on_foreign_handle() {
        let graph = Graph::new();
        assert!(graph.vertex(VertexDesc::new(0)).is_none());
        let _ = &graph[VertexDesc::new(0)];
    }

    #[test]
    fn connected_lists_both_directions() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let a = graph.add_pose(Time::from_nsec(1), "body:rig", false)?;
        let b = graph.add_pose(Time::from_nsec(2), "body:rig", false)?;
        let f = graph.add_relative_pose_prior(RelativePosePriorFactor::new(
            Time::from_nsec(1),
            Time::from_nsec(2),
            "body:rig",
            prior(Transform::identity()),
            a,
            b,
        ))?;
        assert_eq!(vec![a, b], graph.connected(f));
        assert_eq!(vec![f], graph.connected(a));
        assert_eq!(vec![f], graph.connected(b));
        assert!(graph[f].is_factor());
        Ok(())
    }

    #[test]
    fn relative_prior_derives_initial_guess() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let a = graph.add_pose(Time::from_nsec(1), "body:rig", false)?;
        let b = graph.add_pose(Time::from_nsec(2), "body:rig", false)?;
        let z = make_transform(&Point3d::new(0.0, 0.0, 0.2), &Point3d::new(1.0, 0.0, 0.0));
        let start = make_transform(&Point3d::zeros(), &Point3d::new(0.0, 5.0, 0.0));
        graph.add_value_to_optimizer(a, &start)?;
        let f = graph.add_relative_pose_prior(RelativePosePriorFactor::new(
            Time::from_nsec(1),
            Time::from_nsec(2),
            "body:rig",
            prior(z),
            a,
            b,
        ))?;
        graph.add_relative_pose_prior_to_optimizer(f)?;
        assert!(graph.is_optimized(b));
        approx::assert_abs_diff_eq!(
            (start * z).to_homogeneous(),
            graph.pose(b)?.to_homogeneous(),
            epsilon = 1e-12
        );
        assert!(matches!(
            graph.add_relative_pose_prior_to_optimizer(f),
            Err(Error::AlreadyOptimized(_))
        ));
        Ok(())
    }

    #[test]
    fn wrong_kind_rejected() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let a = graph.add_pose(Time::ZERO, "body:a", false)?;
        assert!(matches!(
            graph.add_absolute_pose_prior_to_optimizer(a),
            Err(Error::WrongVertexKind { .. })
        ));
        assert!(graph.add_factor_to_optimizer(a).is_err());
        assert!(!graph.is_optimized(a));
        let f = graph.add_absolute_pose_prior(AbsolutePosePriorFactor::new(
            Time::ZERO,
            "body:a",
            prior(Transform::identity()),
            a,
        ))?;
        assert!(graph.add_value_to_optimizer(f, &Transform::identity()).is_err());
        assert!(matches!(graph.pose(f), Err(Error::WrongVertexKind { .. })));
        Ok(())
    }

    #[test]
    fn invalid_noise_leaves_graph_untouched() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let a = graph.add_pose(Time::from_nsec(1), "body:rig", false)?;
        let b = graph.add_pose(Time::from_nsec(2), "body:rig", false)?;
        let degenerate = PoseWithNoise::new(Transform::identity(), PoseNoise2::make_scalar(0.0, 0.1), true);
        let factor = RelativePosePriorFactor::new(Time::from_nsec(1), Time::from_nsec(2), "body:rig", degenerate, a, b);
        assert!(matches!(
            graph.add_relative_pose_prior(factor.clone()),
            Err(Error::InvalidNoise(_))
        ));
        assert!(graph.factors().is_empty());

        // a factor that slipped past insertion still fails before its ends move
        let f = graph.insert_vertex(factor.into())?;
        assert!(matches!(
            graph.add_relative_pose_prior_to_optimizer(f),
            Err(Error::InvalidNoise(_))
        ));
        assert!(!graph.is_optimized(a));
        assert!(!graph.is_optimized(b));
        assert!(!graph.is_optimized(f));
        assert_eq!(0, graph.optimizer().num_variables());
        Ok(())
    }

    #[test]
    fn tag_projection_solves_missing_rig_pose() -> std::result::Result<(), Box<dyn StdError>> {
        let camera = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
        let t_r_c = make_transform(&Point3d::new(0.0, 0.1, 0.0), &Point3d::new(0.05, 0.0, 0.0));
        let t_w_r = make_transform(&Point3d::new(0.0, 0.0, 0.2), &Point3d::new(0.3, -0.2, 0.0));
        let t_w_b = make_transform(&Point3d::zeros(), &Point3d::new(0.5, 0.0, 1.5));
        let t_b_o = make_transform(&Point3d::new(0.1, 0.0, 0.0), &Point3d::new(0.0, 0.1, 0.0));
        let t_c_o = (t_w_r * t_r_c).inverse() * t_w_b * t_b_o;
        let pixels = crate::models::tag_corners(0.2)
            .map(|c| camera.project(&(t_c_o * nalgebra::Point3::from(c)).coords));

        let mut graph = Graph::new();
        let cam = graph.add_pose(Time::ZERO, "cam:cam0", true)?;
        let rig = graph.add_pose(Time::from_nsec(1), "body:rig", false)?;
        let board = graph.add_pose(Time::ZERO, "body:board", false)?;
        let tag = graph.add_pose(Time::ZERO, "tag:0", false)?;
        graph.add_value_to_optimizer(cam, &t_r_c)?;
        graph.add_value_to_optimizer(board, &t_w_b)?;
        graph.add_value_to_optimizer(tag, &t_b_o)?;
        let f = graph.add_tag_projection(TagProjectionFactor::new(
            Time::from_nsec(1),
            "cam:cam0",
            0,
            0.2,
            camera,
            pixels,
            1.0,
            [cam, rig, board, tag],
        ))?;
        graph.add_tag_projection_to_optimizer(f)?;
        assert!(graph.is_optimized(rig));
        approx::assert_abs_diff_eq!(t_w_r.to_homogeneous(), graph.pose(rig)?.to_homogeneous(), epsilon = 1e-6);
        approx::assert_abs_diff_eq!(0.0, graph.factor_error(f)?, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn tag_projection_gets_four_keys() -> std::result::Result<(), Box<dyn StdError>> {
        let mut graph = Graph::new();
        let cam = graph.add_pose(Time::ZERO, "cam:cam0", true)?;
        let rig = graph.add_pose(Time::from_nsec(1), "body:rig", false)?;
        let board = graph.add_pose(Time::ZERO, "body:board", false)?;
        let tag = graph.add_pose(Time::ZERO, "tag:0", false)?;
        for v in [cam, rig, board] {
            graph.add_value_to_optimizer(v, &Transform::identity())?;
        }
        let t_b_o = make_transform(&Point3d::zeros(), &Point3d::new(0.0, 0.0, 1.0));
        graph.add_value_to_optimizer(tag, &t_b_o)?;
        let f = graph.add_tag_projection(TagProjectionFactor::new(
            Time::from_nsec(1),
            "cam:cam0",
            0,
            0.2,
            CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0),
            [
                Point2d::new(270.0, 190.0),
                Point2d::new(370.0, 190.0),
                Point2d::new(370.0, 290.0),
                Point2d::new(270.0, 290.0),
            ],
            1.0,
            [cam, rig, board, tag],
        ))?;
        let keys = graph.add_factor_to_optimizer(f)?;
        assert_eq!(4, keys.len());
        assert_eq!(Some(&keys[..]), graph.keys(f));
        approx::assert_abs_diff_eq!(0.0, graph.factor_error(f)?, epsilon = 1e-9);
        Ok(())
    }
}
