pub mod measurement;

pub use measurement::{
    tag_corners, AbsolutePoseModel, CameraIntrinsics, CornerProjectionModel, MeasurementModel,
    RelativePoseModel,
};
