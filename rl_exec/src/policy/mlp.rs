//! # Dense network policy backend
//!
//! A multi-layer perceptron whose weights are stored as JSON:
//!
//! ```json
//! {
//!     "layers": [
//!         {"weights": [[...], ...], "bias": [...], "activation": "Tanh"},
//!         ...
//!     ]
//! }
//! ```
//!
//! Each layer's `weights` is `out x in`. The network input is the flattened observation
//! (`scan ‖ pose ‖ vel ‖ heading`) so the number of scan beams is the first layer's input width
//! less 8.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fs, path::Path};

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{input_shapes_for, ObservationBundle, PolicyBackend, PolicyError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Width of the non-scan part of the observation (pose, vel, heading).
const STATE_INPUT_WIDTH: usize = 3 + 3 + 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A dense network policy.
#[derive(Debug, Clone)]
pub struct MlpPolicy {
    layers: Vec<DenseLayer>,
    num_beams: usize,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

#[derive(Debug, Deserialize)]
struct WeightsFile {
    layers: Vec<LayerFile>,
}

#[derive(Debug, Deserialize)]
struct LayerFile {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default)]
    activation: Activation,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Identity,
    Relu,
    Tanh,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MlpPolicy {
    /// Load the policy from a JSON weights file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let json = fs::read_to_string(path.as_ref())
            .map_err(|e| PolicyError::BackendUnavailable(path.as_ref().to_path_buf(), e))?;

        let policy = Self::from_json(&json)?;

        debug!(
            "Loaded {} layer policy from {:?} ({} beams)",
            policy.layers.len(),
            path.as_ref(),
            policy.num_beams
        );

        Ok(policy)
    }

    /// Parse the policy from a JSON string, checking the layer dimensions are consistent.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let file: WeightsFile =
            serde_json::from_str(json).map_err(|e| PolicyError::InvalidWeights(e.to_string()))?;

        if file.layers.is_empty() {
            return Err(PolicyError::InvalidWeights("no layers".into()));
        }

        let mut layers = Vec::with_capacity(file.layers.len());
        let mut prev_out: Option<usize> = None;

        for (i, l) in file.layers.into_iter().enumerate() {
            let rows = l.weights.len();
            let cols = l.weights.first().map_or(0, |r| r.len());

            if rows == 0 || cols == 0 || l.weights.iter().any(|r| r.len() != cols) {
                return Err(PolicyError::InvalidWeights(format!(
                    "layer {} weights are not a non-empty rectangular matrix",
                    i
                )));
            }
            if l.bias.len() != rows {
                return Err(PolicyError::InvalidWeights(format!(
                    "layer {} has {} outputs but {} biases",
                    i,
                    rows,
                    l.bias.len()
                )));
            }
            if let Some(p) = prev_out {
                if p != cols {
                    return Err(PolicyError::InvalidWeights(format!(
                        "layer {} takes {} inputs but the previous layer gives {}",
                        i, cols, p
                    )));
                }
            }

            let flat: Vec<f32> = l.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((rows, cols), flat)
                .map_err(|e| PolicyError::InvalidWeights(e.to_string()))?;

            prev_out = Some(rows);
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(l.bias),
                activation: l.activation,
            });
        }

        let in_width = layers[0].weights.ncols();
        if in_width <= STATE_INPUT_WIDTH {
            return Err(PolicyError::InvalidWeights(format!(
                "input width {} leaves no room for the scan",
                in_width
            )));
        }
        if prev_out.unwrap_or(0) < 2 {
            return Err(PolicyError::InvalidWeights(
                "the final layer must have at least 2 outputs".into(),
            ));
        }

        Ok(Self {
            layers,
            num_beams: in_width - STATE_INPUT_WIDTH,
        })
    }
}

impl PolicyBackend for MlpPolicy {
    fn input_shapes(&self) -> [(usize, usize); 4] {
        input_shapes_for(self.num_beams)
    }

    fn run(&self, obs: &ObservationBundle) -> Result<Vec<Array2<f32>>, PolicyError> {
        let mut x = Array1::from(obs.flatten());

        for l in self.layers.iter() {
            if x.len() != l.weights.ncols() {
                return Err(PolicyError::InferenceFailed(format!(
                    "expected {} inputs to layer, got {}",
                    l.weights.ncols(),
                    x.len()
                )));
            }
            x = l.weights.dot(&x) + &l.bias;
            l.activation.apply(&mut x);
        }

        let n = x.len();
        let out = x
            .into_shape((1, n))
            .map_err(|e| PolicyError::InferenceFailed(e.to_string()))?;

        Ok(vec![out])
    }
}

impl Activation {
    fn apply(&self, x: &mut Array1<f32>) {
        match self {
            Activation::Identity => (),
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Tanh => x.mapv_inplace(f32::tanh),
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Identity
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        policy::PolicyAdapter,
        scan_proc::ScanBuffer,
        state_est::{HeadingCommand, VehicleState},
    };
    use std::sync::Arc;

    /// 2 beam network with a relu hidden layer, steer follows vx and speed follows the first beam.
    const WEIGHTS: &str = r#"{
        "layers": [
            {
                "weights": [
                    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]
                ],
                "bias": [0.0, 0.0],
                "activation": "Relu"
            },
            {
                "weights": [[0.0, 0.5], [0.1, 0.0]],
                "bias": [0.0, 0.0],
                "activation": "Tanh"
            }
        ]
    }"#;

    fn obs(vx: f64) -> ObservationBundle {
        ObservationBundle::new(
            &ScanBuffer::uniform(2, 10.0),
            &VehicleState {
                vx,
                ..Default::default()
            },
            &HeadingCommand::default(),
        )
    }

    #[test]
    fn test_forward() {
        let mlp = MlpPolicy::from_json(WEIGHTS).unwrap();
        assert_eq!(mlp.input_shapes(), [(1, 2), (1, 3), (1, 3), (1, 2)]);

        let out = mlp.run(&obs(1.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dim(), (1, 2));
        assert!((out[0][[0, 0]] - 0.5f32.tanh()).abs() < 1e-6);
        assert!((out[0][[0, 1]] - 1.0f32.tanh()).abs() < 1e-6);

        // Negative velocities are removed by the relu
        let out = mlp.run(&obs(-1.0)).unwrap();
        assert_eq!(out[0][[0, 0]], 0.0);

        let adapter = PolicyAdapter::new(Arc::new(mlp), 0.4189, 4.0);
        let action = adapter.infer(&obs(1.0)).unwrap();
        assert!((action.speed - 4.0 * 1.0f64.tanh()).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_weights() {
        let bad = [
            r#"{"layers": []}"#,
            r#"{"layers": [{"weights": [[1.0, 2.0], [1.0]], "bias": [0.0, 0.0]}]}"#,
            r#"{"layers": [{"weights": [[1.0, 2.0]], "bias": [0.0, 0.0]}]}"#,
            r#"{"layers": [{"weights": [[1.0, 2.0], [1.0, 2.0]], "bias": [0.0, 0.0]}]}"#,
            r#"not json"#,
        ];

        for b in bad.iter() {
            assert!(matches!(
                MlpPolicy::from_json(b),
                Err(PolicyError::InvalidWeights(_))
            ));
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MlpPolicy::load("/does/not/exist/policy.json"),
            Err(PolicyError::BackendUnavailable(_, _))
        ));
    }
}
