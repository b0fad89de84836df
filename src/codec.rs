use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::ImageReader;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;

use crate::model::ImageInput;

const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not read image: {0}")]
    Read(#[from] std::io::Error),
    #[error("image upload is empty")]
    Empty,
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
}

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("invalid data URL: no base64 payload")]
    MissingPayload,
    #[error("invalid data URL: {0}")]
    Malformed(String),
    #[error("base64 decode: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not load image to get details: {0}")]
    Image(#[from] image::ImageError),
}

/// Pixel dimensions and rounded kilobyte size of an encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetrics {
    pub width: u32,
    pub height: u32,
    pub size_kb: u64,
}

/// Reads an uploaded image and stages it as base64 with its declared type.
pub fn decode_upload(mut reader: impl Read, mime_type: &str) -> Result<ImageInput, DecodeError> {
    if !ACCEPTED_MIME_TYPES.contains(&mime_type) {
        return Err(DecodeError::UnsupportedType(mime_type.to_string()));
    }
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(ImageInput {
        base64: B64.encode(&bytes),
        mime_type: mime_type.to_string(),
    })
}

/// Loads an image file from disk, taking its type from the file content.
pub fn read_upload(path: &Path) -> Result<ImageInput, DecodeError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mime_type = sniff_mime_type(&bytes)
        .ok_or_else(|| DecodeError::UnsupportedType(path.display().to_string()))?;
    decode_upload(Cursor::new(bytes), mime_type)
}

pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    // PNG
    if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    // JPEG
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    // WEBP (RIFF....WEBP)
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

impl ImageInput {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Inverse of [`ImageInput::to_data_uri`].
    pub fn from_data_uri(uri: &str) -> Result<Self, MeasureError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| MeasureError::Malformed("missing data: scheme".into()))?;
        let (header, payload) = rest.split_once(',').ok_or(MeasureError::MissingPayload)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| MeasureError::Malformed("payload is not base64".into()))?;
        if mime_type.is_empty() {
            return Err(MeasureError::Malformed("missing mime type".into()));
        }
        if payload.is_empty() {
            return Err(MeasureError::MissingPayload);
        }
        Ok(ImageInput {
            base64: payload.to_string(),
            mime_type: mime_type.to_string(),
        })
    }
}

/// Raw bytes behind a data URI (everything after the first comma).
pub fn decode_data_uri_bytes(uri: &str) -> Result<Vec<u8>, MeasureError> {
    let payload = match uri.split_once(',') {
        Some((_, payload)) if !payload.is_empty() => payload,
        _ => return Err(MeasureError::MissingPayload),
    };
    Ok(B64.decode(payload)?)
}

/// Measures an encoded image from its own bytes. Service-provided metadata is
/// never consulted.
pub fn measure(uri: &str) -> Result<ImageMetrics, MeasureError> {
    let bytes = decode_data_uri_bytes(uri)?;
    let (width, height) = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(image::ImageError::from)?
        .into_dimensions()?;
    Ok(ImageMetrics {
        width,
        height,
        size_kb: size_in_kb(bytes.len()),
    })
}

/// `round(bytes / 1024)`
pub fn size_in_kb(bytes: usize) -> u64 {
    ((bytes as u64) + 512) / 1024
}
