#![cfg(feature = "backend-opencv")]

use std::path::Path;

use ndarray::{Array2, Array4};
use opencv::core::{Mat, Scalar, Vector};
use opencv::dnn::{self, Net, DNN_BACKEND_OPENCV, DNN_TARGET_CPU};
use opencv::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::DetectError;

/// OpenCV DNN backend for two-file Darknet networks (`.cfg` + `.weights`).
pub struct DarknetBackend {
    net: Net,
    names: Vec<String>,
    // Same names as `names`, kept in the form `forward` takes.
    out_names: Vector<String>,
    input_size: i32,
}

impl DarknetBackend {
    pub fn new(config: &Path, weights: &Path, input_size: u32) -> Result<Self, DetectError> {
        let mut net = dnn::read_net_from_darknet(&path_str(config)?, &path_str(weights)?)
            .map_err(|e| cv_err("failed to read darknet network", e))?;
        net.set_preferable_backend(DNN_BACKEND_OPENCV)
            .map_err(|e| cv_err("failed to set backend", e))?;
        net.set_preferable_target(DNN_TARGET_CPU)
            .map_err(|e| cv_err("failed to set target", e))?;

        let out_names = net
            .get_unconnected_out_layers_names()
            .map_err(|e| cv_err("failed to resolve output layers", e))?;
        let names: Vec<String> = out_names.iter().collect();
        log::info!("darknet network loaded, outputs {names:?}");

        Ok(Self {
            net,
            names,
            out_names,
            input_size: input_size as i32,
        })
    }
}

impl InferenceBackend for DarknetBackend {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn output_names(&self) -> &[String] {
        &self.names
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<Array2<f32>>, DetectError> {
        let shape = input.shape();
        let side = self.input_size as usize;
        if shape != [1, 3, side, side] {
            return Err(DetectError::TensorShape(shape.to_vec()));
        }
        let data = input
            .as_slice()
            .ok_or_else(|| DetectError::TensorShape(shape.to_vec()))?;
        let flat = Mat::from_slice(data).map_err(|e| cv_err("failed to wrap input", e))?;
        let blob = flat
            .reshape_nd(1, &[1, 3, self.input_size, self.input_size])
            .map_err(|e| cv_err("failed to shape input blob", e))?;

        self.net
            .set_input(&*blob, "", 1.0, Scalar::default())
            .map_err(|e| cv_err("failed to set input", e))?;
        let mut outs = Vector::<Mat>::new();
        self.net
            .forward(&mut outs, &self.out_names)
            .map_err(|e| cv_err("forward pass failed", e))?;

        outs.iter().map(|out| to_rows(&out)).collect()
    }
}

fn to_rows(out: &Mat) -> Result<Array2<f32>, DetectError> {
    let rows = out.rows().max(0) as usize;
    let cols = out.cols().max(0) as usize;
    let values = out
        .data_typed::<f32>()
        .map_err(|e| cv_err("output is not a continuous f32 matrix", e))?;
    Array2::from_shape_vec((rows, cols), values.to_vec())
        .map_err(|_| DetectError::TensorShape(vec![rows, cols]))
}

fn path_str(path: &Path) -> Result<String, DetectError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| DetectError::Backend(format!("non UTF-8 model path {}", path.display())))
}

fn cv_err(context: &str, e: opencv::Error) -> DetectError {
    DetectError::Backend(format!("{context}: {e}"))
}
