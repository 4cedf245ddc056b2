mod diagnostics;
mod factor;
mod graph;
mod identifier_index;
mod key_tracker;
mod vertex;

pub use diagnostics::{ErrorToVertexMap, GraphStats};
pub use factor::{AbsolutePosePriorFactor, RelativePosePriorFactor, TagProjectionFactor};
pub use graph::Graph;
pub use identifier_index::{body_name, cam_name, make_id, tag_name, IdentifierIndex};
pub use key_tracker::KeyTracker;
pub use vertex::{PoseValue, Vertex, VertexDesc, VertexId};
