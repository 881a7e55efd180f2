use crate::error::ServiceError;
use crate::model::artifact::ArtifactMetadata;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array, Array4, Axis};

/// JPEG quality used when echoing the upload back to the browser.
pub const DISPLAY_JPEG_QUALITY: u8 = 92;

/// Resize target and per-channel normalization applied before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub height: u32,
    pub width: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl From<&ArtifactMetadata> for Normalization {
    fn from(metadata: &ArtifactMetadata) -> Self {
        Self {
            height: metadata.input_size[0],
            width: metadata.input_size[1],
            mean: metadata.mean,
            std: metadata.std,
        }
    }
}

/// Decodes raw upload bytes, guessing the format from the content.
pub fn decode(buffer: &[u8]) -> Result<DynamicImage, ServiceError> {
    Ok(image::load_from_memory(buffer)?)
}

/// Converts a decoded image into a `[1, 3, height, width]` tensor.
/// Any colour mode is flattened to RGB first.
pub fn to_tensor(img: &DynamicImage, norm: &Normalization) -> Result<Array4<f32>, ServiceError> {
    let (h, w) = (norm.height as usize, norm.width as usize);
    let resized = img.resize_exact(norm.width, norm.height, FilterType::Triangle);

    let mut normalized_data = Vec::with_capacity(3 * h * w);
    for pixel in resized.to_rgb8().pixels() {
        for c in 0..3 {
            normalized_data.push(((pixel[c] as f32 / 255.0) - norm.mean[c]) / norm.std[c]);
        }
    }

    // [H, W, C] -> [C, H, W] -> [1, C, H, W]
    let array = Array::from_shape_vec((h, w, 3), normalized_data)
        .map_err(|e| ServiceError::Inference(format!("preprocessing: {}", e)))?;
    let array = array.permuted_axes([2, 0, 1]).insert_axis(Axis(0));

    Ok(array.as_standard_layout().to_owned())
}

/// Re-encodes the image as JPEG and returns it base64 encoded for inline
/// `data:` URIs.
pub fn to_jpeg_base64(img: &DynamicImage) -> Result<String, ServiceError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, DISPLAY_JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(ServiceError::Encode)?;

    Ok(general_purpose::STANDARD.encode(&buffer))
}
