use std::fmt;

use crate::error::{Error, Result};
use crate::mapping::factor::{AbsolutePosePriorFactor, RelativePosePriorFactor, TagProjectionFactor};
use crate::mapping::identifier_index::make_id;
use crate::time::Time;

/// Content derived identifier, unique within a graph
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(String);

impl VertexId {
    pub fn new(id: impl Into<String>) -> VertexId {
        VertexId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle into the vertex arena of one graph. Not meaningful for any other
/// graph instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexDesc(usize);

impl VertexDesc {
    pub(crate) fn new(index: usize) -> VertexDesc {
        VertexDesc(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for VertexDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pose of a body, camera or tag at a given time
#[derive(Clone, Debug, PartialEq)]
pub struct PoseValue {
    pub time: Time,
    pub name: String,
    pub is_cam_pose: bool,
}

impl PoseValue {
    pub fn new(time: Time, name: impl Into<String>, is_cam_pose: bool) -> PoseValue {
        PoseValue {
            time,
            name: name.into(),
            is_cam_pose,
        }
    }

    pub fn id(&self) -> VertexId {
        make_id(self.time, &self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Vertex {
    Pose(PoseValue),
    RelativePosePrior(RelativePosePriorFactor),
    AbsolutePosePrior(AbsolutePosePriorFactor),
    TagProjection(TagProjectionFactor),
}

impl Vertex {
    pub fn id(&self) -> VertexId {
        match self {
            Vertex::Pose(p) => p.id(),
            Vertex::RelativePosePrior(f) => f.id(),
            Vertex::AbsolutePosePrior(f) => f.id(),
            Vertex::TagProjection(f) => f.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Vertex::Pose(p) => &p.name,
            Vertex::RelativePosePrior(f) => &f.name,
            Vertex::AbsolutePosePrior(f) => &f.name,
            Vertex::TagProjection(f) => &f.name,
        }
    }

    pub fn time(&self) -> Time {
        match self {
            Vertex::Pose(p) => p.time,
            Vertex::RelativePosePrior(f) => f.time,
            Vertex::AbsolutePosePrior(f) => f.time,
            Vertex::TagProjection(f) => f.time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Vertex::Pose(_) => "pose",
            Vertex::RelativePosePrior(_) => "relative_pose_prior",
            Vertex::AbsolutePosePrior(_) => "absolute_pose_prior",
            Vertex::TagProjection(_) => "tag_projection",
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Vertex::Pose(_))
    }

    pub fn is_factor(&self) -> bool {
        !self.is_value()
    }

    /// Values a factor constrains, empty for values.
    pub fn endpoints(&self) -> &[VertexDesc] {
        match self {
            Vertex::Pose(_) => &[],
            Vertex::RelativePosePrior(f) => &f.poses,
            Vertex::AbsolutePosePrior(f) => std::slice::from_ref(&f.pose),
            Vertex::TagProjection(f) => &f.poses,
        }
    }

    /// Fails with [`Error::InvalidNoise`] when the noise of a factor cannot
    /// be turned into an information matrix.
    pub fn check_noise(&self) -> Result<()> {
        let valid = match self {
            Vertex::Pose(_) => true,
            Vertex::RelativePosePrior(f) => f.prior.noise.information().is_ok(),
            Vertex::AbsolutePosePrior(f) => f.prior.noise.information().is_ok(),
            Vertex::TagProjection(f) => f.pixel_noise.is_finite() && f.pixel_noise > 0.0,
        };
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidNoise(self.id()))
        }
    }

    /// Copy of this vertex with every endpoint passed through `f`.
    pub(crate) fn remap(&self, mut f: impl FnMut(VertexDesc) -> Result<VertexDesc>) -> Result<Vertex> {
        let mut vertex = self.clone();
        match &mut vertex {
            Vertex::Pose(_) => {}
            Vertex::RelativePosePrior(p) => {
                for e in p.poses.iter_mut() {
                    *e = f(*e)?;
                }
            }
            Vertex::AbsolutePosePrior(p) => p.pose = f(p.pose)?,
            Vertex::TagProjection(p) => {
                for e in p.poses.iter_mut() {
                    *e = f(*e)?;
                }
            }
        }
        Ok(vertex)
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vertex::Pose(p) => write!(
                f,
                "{} {} t={}{}",
                self.kind(),
                p.name,
                p.time,
                if p.is_cam_pose { " (cam)" } else { "" }
            ),
            _ => write!(f, "{} {} t={}", self.kind(), self.id(), self.time()),
        }
    }
}

impl From<PoseValue> for Vertex {
    fn from(p: PoseValue) -> Self {
        Vertex::Pose(p)
    }
}

impl From<RelativePosePriorFactor> for Vertex {
    fn from(f: RelativePosePriorFactor) -> Self {
        Vertex::RelativePosePrior(f)
    }
}

impl From<AbsolutePosePriorFactor> for Vertex {
    fn from(f: AbsolutePosePriorFactor) -> Self {
        Vertex::AbsolutePosePrior(f)
    }
}

impl From<TagProjectionFactor> for Vertex {
    fn from(f: TagProjectionFactor) -> Self {
        Vertex::TagProjection(f)
    }
}
