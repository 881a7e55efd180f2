//! Model artifact bundle.
//!
//! A gzip-compressed tar archive holding:
//! - `metadata.json` - vocabulary, preprocessing parameters, export paths
//! - `model.onnx`    - the exported network

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::error::ServiceError;
use crate::model::portable_path;

pub const METADATA_ENTRY: &str = "metadata.json";
pub const MODEL_ENTRY: &str = "model.onnx";

// ImageNet statistics, the usual normalization for transfer-learned backbones
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactMetadata {
    /// Class names in the order of the model's output scores.
    pub vocab: Vec<String>,

    /// `[height, width]` the network expects.
    #[serde(default = "default_input_size")]
    pub input_size: [u32; 2],

    #[serde(default = "default_mean")]
    pub mean: [f32; 3],

    #[serde(default = "default_std")]
    pub std: [f32; 3],

    /// False when the exported graph already ends in a softmax.
    #[serde(default = "default_apply_softmax")]
    pub apply_softmax: bool,

    #[serde(default)]
    pub arch: Option<String>,

    /// Where the exporting machine kept the learner. Recorded in its own
    /// path convention, remapped on load.
    #[serde(default, deserialize_with = "portable_path::deserialize_option")]
    pub export_path: Option<PathBuf>,

    #[serde(default, deserialize_with = "portable_path::deserialize_option")]
    pub data_path: Option<PathBuf>,
}

fn default_input_size() -> [u32; 2] {
    [224, 224]
}

fn default_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STD
}

fn default_apply_softmax() -> bool {
    true
}

impl ArtifactMetadata {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ServiceError> {
        let metadata: Self = serde_json::from_slice(bytes)
            .map_err(|e| ServiceError::Artifact(format!("{}: {}", METADATA_ENTRY, e)))?;
        metadata.validate()?;
        Ok(metadata)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.vocab.len() < 2 {
            return Err(ServiceError::Artifact(format!(
                "vocabulary needs at least two classes, got {:?}",
                self.vocab
            )));
        }
        if self.input_size.contains(&0) {
            return Err(ServiceError::Artifact(format!(
                "input size must be non-zero, got {:?}",
                self.input_size
            )));
        }
        if self.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(ServiceError::Artifact(format!(
                "normalization std must be finite and non-zero, got {:?}",
                self.std
            )));
        }
        Ok(())
    }
}

/// Contents of an artifact bundle, read fully into memory.
pub struct ModelBundle {
    pub metadata: ArtifactMetadata,
    pub model: Vec<u8>,
}

/// Reads and validates the bundle at `path`.
pub fn read_bundle(path: &Path) -> Result<ModelBundle, ServiceError> {
    if !path.exists() {
        return Err(ServiceError::ModelNotFound(path.display().to_string()));
    }

    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut metadata = None;
    let mut model = None;

    let entries = archive
        .entries()
        .map_err(|e| ServiceError::Artifact(format!("{}: {}", path.display(), e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ServiceError::Artifact(format!("{}: {}", path.display(), e)))?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                metadata = Some(ArtifactMetadata::from_json(&buf)?);
            }
            MODEL_ENTRY => {
                // The header size comes from a downloaded file; let the
                // buffer grow with what is actually read.
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                model = Some(buf);
            }
            _ => {}
        }
    }

    let metadata = metadata.ok_or_else(|| {
        ServiceError::Artifact(format!("{} not found in {}", METADATA_ENTRY, path.display()))
    })?;
    let model = model
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            ServiceError::Artifact(format!("{} not found in {}", MODEL_ENTRY, path.display()))
        })?;

    Ok(ModelBundle { metadata, model })
}

/// Writes a bundle to `path`. The metadata is validated before anything is
/// written.
pub fn write_bundle(path: &Path, metadata_json: &[u8], model: &[u8]) -> Result<(), ServiceError> {
    ArtifactMetadata::from_json(metadata_json)?;
    if model.is_empty() {
        return Err(ServiceError::Artifact("model graph is empty".to_string()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let encoder = GzEncoder::new(File::create(path)?, Compression::default());
    let mut builder = Builder::new(encoder);
    append_entry(&mut builder, METADATA_ENTRY, metadata_json)?;
    append_entry(&mut builder, MODEL_ENTRY, model)?;
    builder.into_inner()?.finish()?;

    Ok(())
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<(), ServiceError> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}
