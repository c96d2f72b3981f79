#![cfg(feature = "backend-tract")]

use std::path::Path;

use ndarray::{Array2, Array4};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::DetectError;

/// Tract-based backend for single-file ONNX detectors.
///
/// The model must emit the same row layout as the Darknet heads:
/// `[cx, cy, w, h, objectness, scores...]` per candidate.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: usize,
    names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self, DetectError> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let backend_err = |stage: &str, e: TractError| {
            DetectError::Backend(format!("{stage} {}: {e}", model_path.display()))
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| backend_err("failed to load ONNX model from", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .map_err(|e| backend_err("failed to set input fact for", e))?
            .into_optimized()
            .map_err(|e| backend_err("failed to optimize", e))?;

        let names = model
            .output_outlets()
            .map_err(|e| backend_err("failed to list outputs of", e))?
            .iter()
            .map(|outlet| model.node(outlet.node).name.clone())
            .collect();

        let model = model
            .into_runnable()
            .map_err(|e| backend_err("failed to build runnable model from", e))?;

        Ok(Self {
            model,
            input_size: size,
            names,
        })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn output_names(&self) -> &[String] {
        &self.names
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<Array2<f32>>, DetectError> {
        let shape = input.shape();
        if shape != [1, 3, self.input_size, self.input_size] {
            return Err(DetectError::TensorShape(shape.to_vec()));
        }
        let data = input
            .as_slice()
            .ok_or_else(|| DetectError::TensorShape(shape.to_vec()))?;
        let tensor = Tensor::from_shape(shape, data)
            .map_err(|e| DetectError::Backend(format!("input tensor: {e}")))?;

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| DetectError::Backend(format!("ONNX inference failed: {e}")))?;

        outputs.iter().map(|output| to_rows(output)).collect()
    }
}

/// Flatten a head to `[candidates, attributes]`, dropping leading batch axes.
fn to_rows(output: &Tensor) -> Result<Array2<f32>, DetectError> {
    let shape = output.shape();
    let cols = *shape.last().ok_or_else(|| DetectError::TensorShape(shape.to_vec()))?;
    let values = output
        .as_slice::<f32>()
        .map_err(|e| DetectError::Backend(format!("output tensor was not f32: {e}")))?;
    let rows = if cols == 0 { 0 } else { values.len() / cols };
    Array2::from_shape_vec((rows, cols), values.to_vec())
        .map_err(|_| DetectError::TensorShape(shape.to_vec()))
}
