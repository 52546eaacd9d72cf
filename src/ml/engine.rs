use std::path::Path;
use std::sync::Once;

use ort::session::Session;
use tracing::info;

use crate::error::{PipelineError, Result};

static RUNTIME: Once = Once::new();

fn init_runtime() {
    RUNTIME.call_once(|| {
        // Only fails if an environment already exists, in which case ort
        // keeps using that one.
        let _ = ort::init()
            .with_name("clipset-inference")
            .commit();
    });
}

/// Loads one ONNX model. Any failure is a `ModelLoad` error, which aborts
/// the run.
pub fn load_session(model_path: &Path) -> Result<Session> {
    if !model_path.is_file() {
        return Err(PipelineError::ModelLoad {
            path: model_path.to_path_buf(),
            message: "model file does not exist".into(),
        });
    }
    init_runtime();

    let session = Session::builder()
        .and_then(|b| b.with_intra_threads(1))
        .and_then(|b| b.commit_from_file(model_path))
        .map_err(|e| PipelineError::ModelLoad {
            path: model_path.to_path_buf(),
            message: e.to_string(),
        })?;

    info!(
        "Loaded model {:?} (inputs: {:?})",
        model_path,
        session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>()
    );
    Ok(session)
}

pub fn input_name(session: &Session, index: usize) -> Result<&str> {
    session
        .inputs
        .get(index)
        .map(|i| i.name.as_str())
        .ok_or_else(|| PipelineError::Inference(format!("model has no input #{}", index)))
}

pub fn output_name(session: &Session, index: usize) -> Result<&str> {
    session
        .outputs
        .get(index)
        .map(|o| o.name.as_str())
        .ok_or_else(|| PipelineError::Inference(format!("model has no output #{}", index)))
}

pub fn inference_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Inference(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_fatal() {
        let err = load_session(Path::new("/no/such/model.onnx")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
        assert!(err.is_fatal());
    }
}
