use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use opencv::{
    core::{Mat, Vector},
    imgcodecs,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV decode error: {0}")]
    OpenCvDecodeError(opencv::Error),
    #[error("Data is not a decodable image")]
    NotAnImage,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub struct ImageConverter;

impl ImageConverter {
    /// Decodes an encoded image (JPEG, PNG, ...) into a 3-channel BGR frame.
    pub fn bytes_to_mat(bytes: &[u8]) -> Result<Mat, CvUtilsError> {
        if bytes.is_empty() {
            return Err(CvUtilsError::NotAnImage);
        }

        let mat = imgcodecs::imdecode(&Vector::<u8>::from_slice(bytes), imgcodecs::IMREAD_COLOR)
            .map_err(CvUtilsError::OpenCvDecodeError)?;

        // imdecode signals unknown formats with an empty matrix, not an error.
        if mat.empty() {
            return Err(CvUtilsError::NotAnImage);
        }
        Ok(mat)
    }

    pub fn encode_mat_to_jpg(mat: &Mat) -> Result<Vec<u8>, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        Ok(buf.into())
    }

    pub fn encode_mat_to_base64_jpg(mat: &Mat) -> Result<String, CvUtilsError> {
        let jpg = Self::encode_mat_to_jpg(mat)?;
        Ok(BASE64.encode(jpg))
    }

    pub fn base64_jpg_to_mat(encoded: &str) -> Result<Mat, CvUtilsError> {
        let bytes = BASE64.decode(encoded)?;
        Self::bytes_to_mat(&bytes)
    }
}
