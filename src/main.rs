use log::info;
use std::error::Error;
use std::path::Path;

use tagslam::config::{self, OptimizerConfig};
use tagslam::geometry::{make_transform, Point2d, Point3d};
use tagslam::mapping::{
    body_name, cam_name, tag_name, AbsolutePosePriorFactor, Graph, RelativePosePriorFactor,
    TagProjectionFactor,
};
use tagslam::models::{tag_corners, CameraIntrinsics};
use tagslam::optimizer::LevenbergMarquardt;
use tagslam::{PoseNoise2, PoseWithNoise, Time, Transform};

const DEFAULT_CONFIG: &str = r#"
optimizer:
  max_iterations_full: 50
  verbosity: SUMMARY
rig:
  pose:
    position: {x: 0.0, y: 0.0, z: 0.0}
    rotation: {x: 0.0, y: 0.0, z: 0.0}
    position_noise: {x: 0.001, y: 0.001, z: 0.001}
    rotation_noise: {x: 0.001, y: 0.001, z: 0.001}
tag_size: 0.16
"#;

/// Rig moving sideways in front of a tag, one tag sighting per step.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let doc = match std::env::args().nth(1) {
        Some(path) => config::load_document(Path::new(&path))?,
        None => config::document_from_str(DEFAULT_CONFIG)?,
    };
    let optimizer_config: OptimizerConfig = match doc.get("optimizer") {
        Some(section) => serde_yaml::from_value(section.clone())?,
        None => OptimizerConfig::default(),
    };
    let rig_prior: PoseWithNoise = config::parse(&doc, "rig.pose")?;
    let tag_size: f64 = config::parse(&doc, "tag_size")?;

    let camera = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0);
    let mut graph = Graph::with_optimizer(LevenbergMarquardt::new(optimizer_config));
    let known = PoseNoise2::make_scalar(1e-4, 1e-4);

    // static quantities: camera extrinsics, board pose and tag pose on the board
    let cam = graph.add_pose(Time::ZERO, &cam_name("cam0"), true)?;
    let board = graph.add_pose(Time::ZERO, &body_name("board"), false)?;
    let tag = graph.add_pose(Time::ZERO, &tag_name(0), false)?;
    let t_b_o = make_transform(&Point3d::zeros(), &Point3d::new(0.0, 0.0, 2.0));
    for (v, pose) in [(cam, Transform::identity()), (board, Transform::identity())] {
        let name = graph[v].name().to_owned();
        let f = graph.add_absolute_pose_prior(AbsolutePosePriorFactor::new(
            Time::ZERO,
            name,
            PoseWithNoise::new(pose, known, true),
            v,
        ))?;
        graph.add_absolute_pose_prior_to_optimizer(f)?;
    }
    // the tag pose is initialized from its first detection

    let rig = body_name("rig");
    let step = make_transform(&Point3d::zeros(), &Point3d::new(0.05, 0.0, 0.0));
    let odom_noise = PoseNoise2::make_scalar(0.01, 0.01);
    let mut truth = rig_prior.pose;
    let mut prev = None;
    for i in 0..10u32 {
        let t = Time::new(i, 0);
        let v = graph.add_pose(t, &rig, false)?;
        match prev {
            None => {
                let f = graph.add_absolute_pose_prior(AbsolutePosePriorFactor::new(t, rig.clone(), rig_prior, v))?;
                graph.add_absolute_pose_prior_to_optimizer(f)?;
            }
            Some((t_prev, v_prev)) => {
                truth *= step;
                let f = graph.add_relative_pose_prior(RelativePosePriorFactor::new(
                    t_prev,
                    t,
                    rig.clone(),
                    PoseWithNoise::new(step, odom_noise, true),
                    v_prev,
                    v,
                ))?;
                graph.add_relative_pose_prior_to_optimizer(f)?;
            }
        }
        // synthesize the detection from the true poses
        let t_c_o = truth.inverse() * t_b_o;
        let corners = tag_corners(tag_size);
        let pixels: Vec<Point2d> = corners
            .iter()
            .map(|c| camera.project(&(t_c_o * nalgebra::Point3::from(*c)).coords))
            .collect();
        let f = graph.add_tag_projection(TagProjectionFactor::new(
            t,
            cam_name("cam0"),
            0,
            tag_size,
            camera,
            [pixels[0], pixels[1], pixels[2], pixels[3]],
            1.0,
            [cam, v, board, tag],
        ))?;
        graph.add_tag_projection_to_optimizer(f)?;
        let error = graph.optimize(1e-6)?;
        info!("step {i}: error after incremental pass {error:.5}");
        prev = Some((t, v));
    }

    let error = graph.optimize_full(true)?;
    graph.transfer_full_optimization();
    info!("full optimization error {error:.5}");
    let tag_pose = graph.pose(tag)?;
    info!("tag position {}", tag_pose.translation.vector.transpose());
    for (error, v) in graph.error_map()?.worst(3) {
        info!("worst factor {} error {error:.5}", graph.info(*v));
    }
    graph.print_unoptimized();
    println!("{}", graph.stats());
    Ok(())
}
