pub mod config;
pub mod error;
pub mod geometry;
pub mod mapping;
pub mod models;
pub mod noise;
pub mod optimizer;
pub mod time;

pub use error::{Error, Result};
pub use geometry::{Point2d, Point3d, Transform};
pub use mapping::{Graph, Vertex, VertexDesc, VertexId};
pub use noise::{PoseNoise2, PoseWithNoise};
pub use time::Time;
