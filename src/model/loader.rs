use crate::error::ServiceError;
use crate::model::service::Classifier;
use ndarray::{Array4, ArrayViewD, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::sync::Mutex;
use tracing::info;

// Initialize the global environment for ORT (only needed once)
pub fn init_ort() -> Result<(), ServiceError> {
    ort::init().with_name("crackscope").commit()?;
    Ok(())
}

/// Builds an inference session from an in-memory ONNX graph.
pub fn load_session(model: &[u8], intra_threads: usize) -> Result<Session, ServiceError> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?
        .commit_from_memory(model)?;

    for (i, input) in session.inputs.iter().enumerate() {
        info!(index = i, name = %input.name, kind = ?input.input_type, "model input");
    }

    Ok(session)
}

/// ONNX Runtime backed classifier. `Session::run` needs `&mut`, so the
/// session is guarded; the rest of the loaded model is read-only.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxClassifier {
    pub fn new(session: Session) -> Result<Self, ServiceError> {
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| ServiceError::Artifact("model graph declares no inputs".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    pub fn from_bytes(model: &[u8], intra_threads: usize) -> Result<Self, ServiceError> {
        Self::new(load_session(model, intra_threads)?)
    }
}

impl Classifier for OnnxClassifier {
    fn scores(&self, input: Array4<f32>) -> Result<Vec<f32>, ServiceError> {
        let shape = input.shape().to_vec();
        let (data, _) = input.into_raw_vec_and_offset();
        let input_value = Tensor::from_array((shape, data.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ServiceError::Inference("ONNX session lock poisoned".to_string()))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_value])?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        if dims.first().copied().unwrap_or(0) == 0 {
            return Err(ServiceError::Inference(format!(
                "model returned an empty batch (output shape {:?})",
                dims
            )));
        }

        let output = ArrayViewD::from_shape(dims.as_slice(), data)?;
        Ok(output.index_axis(Axis(0), 0).iter().copied().collect())
    }
}
