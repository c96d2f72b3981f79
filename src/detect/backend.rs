use ndarray::{Array2, Array4};

use super::DetectError;

/// A loaded detection network.
///
/// Input is an NCHW `f32` tensor of shape `[1, 3, S, S]`. Each output is a
/// 2-D matrix with one row per candidate:
/// `[center_x, center_y, width, height, objectness, class scores...]`,
/// coordinates normalized to the input.
///
/// The backend and target are fixed when the network is loaded. Output names
/// are resolved once at load time and cached.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Names of the output heads, in forward order.
    fn output_names(&self) -> &[String];

    /// Run one forward pass.
    fn forward(&mut self, input: &Array4<f32>) -> Result<Vec<Array2<f32>>, DetectError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), DetectError> {
        Ok(())
    }
}
