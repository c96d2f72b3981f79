use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array2, Array4};

use crate::detect::backend::InferenceBackend;
use crate::detect::DetectError;

/// Stub backend for testing. Returns canned output tensors.
pub struct StubBackend {
    outputs: Vec<Array2<f32>>,
    names: Vec<String>,
    calls: Arc<AtomicUsize>,
    panic_on: Option<usize>,
    fail_on: Option<usize>,
}

impl StubBackend {
    /// Every forward pass returns `outputs`.
    pub fn new(outputs: Vec<Array2<f32>>) -> Self {
        let names = (0..outputs.len()).map(|i| format!("stub_out_{i}")).collect();
        Self {
            outputs,
            names,
            calls: Arc::new(AtomicUsize::new(0)),
            panic_on: None,
            fail_on: None,
        }
    }

    /// Single head with no candidate rows, `classes` score columns wide.
    pub fn empty(classes: usize) -> Self {
        Self::new(vec![Array2::zeros((0, 5 + classes))])
    }

    /// Panic on the `n`th call (1-based).
    pub fn panic_on(mut self, n: usize) -> Self {
        self.panic_on = Some(n);
        self
    }

    /// Return an error on the `n`th call (1-based).
    pub fn fail_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Shared forward-pass counter.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty(80)
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn output_names(&self) -> &[String] {
        &self.names
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<Array2<f32>>, DetectError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_on == Some(n) {
            panic!("stub backend asked to panic on call {n}");
        }
        if self.fail_on == Some(n) {
            return Err(DetectError::Backend(format!("stub failure on call {n}")));
        }
        if input.shape()[1] != 3 {
            return Err(DetectError::TensorShape(input.shape().to_vec()));
        }
        Ok(self.outputs.clone())
    }
}
