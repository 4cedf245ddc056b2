//! Configuration loading.
//!
//! Priors, noise models and transforms are read from a hierarchical YAML
//! document by key path. Optimizer settings deserialize straight into
//! [`OptimizerConfig`].

use log::error;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

use crate::error::{Error, Result};
use crate::geometry::{make_transform, Point3d, Transform};
use crate::noise::{PoseNoise2, PoseWithNoise};

/// Settings of the Levenberg-Marquardt optimizer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    /// Iteration cap of an incremental pass
    #[serde(default = "default_max_iterations_incremental")]
    pub max_iterations_incremental: usize,

    /// Iteration cap of a full pass
    #[serde(default = "default_max_iterations_full")]
    pub max_iterations_full: usize,

    /// Starting LM damping
    #[serde(default = "default_initial_lambda")]
    pub initial_lambda: f64,

    /// Step norm below which a pass has converged
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Central difference step for the jacobians
    #[serde(default = "default_jacobian_step")]
    pub jacobian_step: f64,

    #[serde(default = "default_verbosity")]
    pub verbosity: String,
}

fn default_max_iterations_incremental() -> usize {
    10
}

fn default_max_iterations_full() -> usize {
    100
}

fn default_initial_lambda() -> f64 {
    1e-3
}

fn default_tolerance() -> f64 {
    1e-8
}

fn default_jacobian_step() -> f64 {
    1e-6
}

fn default_verbosity() -> String {
    "SILENT".to_owned()
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations_incremental: default_max_iterations_incremental(),
            max_iterations_full: default_max_iterations_full(),
            initial_lambda: default_initial_lambda(),
            tolerance: default_tolerance(),
            jacobian_step: default_jacobian_step(),
            verbosity: default_verbosity(),
        }
    }
}

impl OptimizerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

pub fn load_document(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)?;
    document_from_str(&contents)
}

pub fn document_from_str(yaml: &str) -> Result<Value> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Types that can be read from a config document
pub trait FromConfig: Sized {
    /// Parses `value`, found at the full key path `path`.
    fn from_value(value: &Value, path: &str) -> Result<Self>;
}

/// Parses the entry at the dot separated `key_path` of `doc`.
///
/// A missing or malformed entry fails with [`Error::Config`] naming the
/// full offending path.
pub fn parse<T: FromConfig>(doc: &Value, key_path: &str) -> Result<T> {
    let value = lookup(doc, key_path)?;
    T::from_value(value, key_path).map_err(|e| {
        error!("error parsing: {key_path}");
        e
    })
}

fn lookup<'a>(doc: &'a Value, key_path: &str) -> Result<&'a Value> {
    let mut node = doc;
    for key in key_path.split('.') {
        node = node.get(key).ok_or_else(|| {
            error!("key not found: {key_path}");
            Error::Config {
                key: key_path.to_owned(),
                reason: "key not found".to_owned(),
            }
        })?;
    }
    Ok(node)
}

fn member<'a>(value: &'a Value, path: &str, key: &str) -> Result<(&'a Value, String)> {
    let full = format!("{path}.{key}");
    match value.get(key) {
        Some(v) => Ok((v, full)),
        None => Err(Error::Config {
            key: full,
            reason: "key not found".to_owned(),
        }),
    }
}

impl FromConfig for f64 {
    fn from_value(value: &Value, path: &str) -> Result<Self> {
        value.as_f64().ok_or_else(|| Error::Config {
            key: path.to_owned(),
            reason: format!("expected a number, found {value:?}"),
        })
    }
}

impl FromConfig for Point3d {
    fn from_value(value: &Value, path: &str) -> Result<Self> {
        let mut xyz = [0.0; 3];
        for (c, key) in xyz.iter_mut().zip(["x", "y", "z"]) {
            let (v, full) = member(value, path, key)?;
            *c = f64::from_value(v, &full)?;
        }
        Ok(Point3d::new(xyz[0], xyz[1], xyz[2]))
    }
}

impl FromConfig for Transform {
    fn from_value(value: &Value, path: &str) -> Result<Self> {
        let (p, p_path) = member(value, path, "position")?;
        let (r, r_path) = member(value, path, "rotation")?;
        let position = Point3d::from_value(p, &p_path)?;
        let rotation = Point3d::from_value(r, &r_path)?;
        Ok(make_transform(&rotation, &position))
    }
}

impl FromConfig for PoseNoise2 {
    fn from_value(value: &Value, path: &str) -> Result<Self> {
        let (p, p_path) = member(value, path, "position_noise")?;
        let (r, r_path) = member(value, path, "rotation_noise")?;
        let position = Point3d::from_value(p, &p_path)?;
        let rotation = Point3d::from_value(r, &r_path)?;
        Ok(PoseNoise2::make(&rotation, &position))
    }
}

impl FromConfig for PoseWithNoise {
    fn from_value(value: &Value, path: &str) -> Result<Self> {
        let pose = Transform::from_value(value, path)?;
        let noise = PoseNoise2::from_value(value, path)?;
        Ok(PoseWithNoise::new(pose, noise, true))
    }
}
