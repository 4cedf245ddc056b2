use crate::geometry::Point2d;
use crate::mapping::identifier_index::{make_id, tag_name};
use crate::mapping::vertex::{VertexDesc, VertexId};
use crate::models::CameraIntrinsics;
use crate::noise::PoseWithNoise;
use crate::time::Time;

/// Measured pose at `time` relative to the pose at `time_prev`,
/// e.g. odometry of a body. `poses` is `[previous, current]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RelativePosePriorFactor {
    pub time_prev: Time,
    pub time: Time,
    pub name: String,
    pub prior: PoseWithNoise,
    pub poses: [VertexDesc; 2],
}

impl RelativePosePriorFactor {
    pub fn new(
        time_prev: Time,
        time: Time,
        name: impl Into<String>,
        prior: PoseWithNoise,
        previous: VertexDesc,
        current: VertexDesc,
    ) -> RelativePosePriorFactor {
        RelativePosePriorFactor {
            time_prev,
            time,
            name: name.into(),
            prior,
            poses: [previous, current],
        }
    }

    pub fn id(&self) -> VertexId {
        make_id(self.time, &format!("r_{}_{}", self.name, self.time_prev.to_nsec()))
    }
}

/// Measured pose in the world frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AbsolutePosePriorFactor {
    pub time: Time,
    pub name: String,
    pub prior: PoseWithNoise,
    pub pose: VertexDesc,
}

impl AbsolutePosePriorFactor {
    pub fn new(
        time: Time,
        name: impl Into<String>,
        prior: PoseWithNoise,
        pose: VertexDesc,
    ) -> AbsolutePosePriorFactor {
        AbsolutePosePriorFactor {
            time,
            name: name.into(),
            prior,
            pose,
        }
    }

    pub fn id(&self) -> VertexId {
        make_id(self.time, &format!("a_{}", self.name))
    }
}

/// Detection of the four corners of a tag in a camera image.
///
/// `poses` is `[T_r_c, T_w_r, T_w_b, T_b_o]`: camera in rig, rig in world,
/// body carrying the tag in world, tag in body.
#[derive(Clone, Debug, PartialEq)]
pub struct TagProjectionFactor {
    pub time: Time,
    /// name of the observing camera
    pub name: String,
    pub tag_id: u32,
    pub tag_size: f64,
    pub camera: CameraIntrinsics,
    pub image_corners: [Point2d; 4],
    pub pixel_noise: f64,
    pub poses: [VertexDesc; 4],
}

impl TagProjectionFactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time: Time,
        name: impl Into<String>,
        tag_id: u32,
        tag_size: f64,
        camera: CameraIntrinsics,
        image_corners: [Point2d; 4],
        pixel_noise: f64,
        poses: [VertexDesc; 4],
    ) -> TagProjectionFactor {
        TagProjectionFactor {
            time,
            name: name.into(),
            tag_id,
            tag_size,
            camera,
            image_corners,
            pixel_noise,
            poses,
        }
    }

    pub fn id(&self) -> VertexId {
        make_id(self.time, &format!("p_{}-{}", self.name, tag_name(self.tag_id)))
    }
}
