pub mod stub;

#[cfg(feature = "backend-opencv")]
pub mod darknet;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-opencv")]
pub use darknet::DarknetBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use std::path::Path;

use super::backend::InferenceBackend;
use super::DetectError;
use crate::config::{DetectorSettings, ModelFormat};

/// Load the network named by the settings. Called once at startup.
pub fn load_backend(settings: &DetectorSettings) -> Result<Box<dyn InferenceBackend>, DetectError> {
    match settings.format {
        ModelFormat::Stub => Ok(Box::new(StubBackend::default())),
        ModelFormat::Darknet => {
            require_file(&settings.model_config)?;
            require_file(&settings.model_weights)?;
            #[cfg(feature = "backend-opencv")]
            {
                Ok(Box::new(DarknetBackend::new(
                    &settings.model_config,
                    &settings.model_weights,
                    settings.input_size,
                )?))
            }
            #[cfg(not(feature = "backend-opencv"))]
            {
                Err(DetectError::Backend(
                    "darknet models require the backend-opencv feature".to_string(),
                ))
            }
        }
        ModelFormat::Onnx => {
            require_file(&settings.model_weights)?;
            #[cfg(feature = "backend-tract")]
            {
                Ok(Box::new(TractBackend::new(
                    &settings.model_weights,
                    settings.input_size,
                )?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(DetectError::Backend(
                    "ONNX models require the backend-tract feature".to_string(),
                ))
            }
        }
    }
}

fn require_file(path: &Path) -> Result<(), DetectError> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|source| DetectError::ModelFile {
            path: path.to_path_buf(),
            source,
        })
}
