//! Human readable views of a graph: residual ranking, statistics and
//! dumps.

use log::{info, warn};
use std::fmt;

use crate::error::Result;
use crate::mapping::graph::Graph;
use crate::mapping::vertex::{Vertex, VertexDesc};
use crate::optimizer::Optimizer;

/// Factors ranked by their current error, smallest first. Equal errors keep
/// factor insertion order.
#[derive(Clone, Debug, Default)]
pub struct ErrorToVertexMap {
    entries: Vec<(f64, VertexDesc)>,
}

impl ErrorToVertexMap {
    fn from_unsorted(mut entries: Vec<(f64, VertexDesc)>) -> ErrorToVertexMap {
        // stable sort, ties stay in insertion order
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        ErrorToVertexMap { entries }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &(f64, VertexDesc)> {
        self.entries.iter()
    }

    /// Worst offenders first
    pub fn worst(&self, n: usize) -> impl Iterator<Item = &(f64, VertexDesc)> {
        self.entries.iter().rev().take(n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a ErrorToVertexMap {
    type Item = &'a (f64, VertexDesc);
    type IntoIter = std::slice::Iter<'a, (f64, VertexDesc)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Vertex counts of a graph
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GraphStats {
    pub values: usize,
    pub cam_poses: usize,
    pub factors: usize,
    pub relative_pose_priors: usize,
    pub absolute_pose_priors: usize,
    pub tag_projections: usize,
    pub optimized_values: usize,
    pub optimized_factors: usize,
    pub error: f64,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "values: {} (cams: {}, optimized: {}) factors: {} (rel: {}, abs: {}, proj: {}, optimized: {}) error: {:.5}",
            self.values,
            self.cam_poses,
            self.optimized_values,
            self.factors,
            self.relative_pose_priors,
            self.absolute_pose_priors,
            self.tag_projections,
            self.optimized_factors,
            self.error
        )
    }
}

impl<O: Optimizer> Graph<O> {
    /// One line description of a vertex.
    pub fn info(&self, v: VertexDesc) -> String {
        match self.vertex(v) {
            Some(vertex) => format!(
                "{v} {vertex}{}",
                if self.is_optimized(v) { " [opt]" } else { "" }
            ),
            None => format!("{v} <invalid>"),
        }
    }

    /// Ranks every submitted factor by its error at the current estimate.
    pub fn error_map(&self) -> Result<ErrorToVertexMap> {
        let mut entries = Vec::with_capacity(self.factors().len());
        for f in self.factors() {
            if self.is_optimized(*f) {
                entries.push((self.factor_error(*f)?, *f));
            }
        }
        Ok(ErrorToVertexMap::from_unsorted(entries))
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            error: self.error(),
            ..Default::default()
        };
        for v in self.vertex_descs() {
            let vertex = &self[v];
            let optimized = self.is_optimized(v);
            match vertex {
                Vertex::Pose(p) => {
                    stats.values += 1;
                    stats.cam_poses += p.is_cam_pose as usize;
                    stats.optimized_values += optimized as usize;
                }
                Vertex::RelativePosePrior(_) => stats.relative_pose_priors += 1,
                Vertex::AbsolutePosePrior(_) => stats.absolute_pose_priors += 1,
                Vertex::TagProjection(_) => stats.tag_projections += 1,
            }
            if vertex.is_factor() {
                stats.factors += 1;
                stats.optimized_factors += optimized as usize;
            }
        }
        stats
    }

    pub fn print(&self, prefix: &str) {
        for v in self.vertex_descs() {
            let neighbors: Vec<String> = self.connected(v).iter().map(|n| n.to_string()).collect();
            info!("{prefix} {} -> [{}]", self.info(v), neighbors.join(", "));
        }
        info!("{prefix} {}", self.stats());
    }

    /// Vertices never handed to the optimizer.
    pub fn unoptimized(&self) -> Vec<VertexDesc> {
        self.vertex_descs()
            .filter(|v| !self.is_optimized(*v))
            .collect()
    }

    /// Logs every vertex that never reached the optimizer. A value listed
    /// here is not connected to any anchored prior.
    pub fn print_unoptimized(&self) {
        for v in self.unoptimized() {
            warn!("unoptimized: {}", self.info(v));
        }
    }
}
