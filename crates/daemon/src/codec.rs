//! Image codec used for dimensions and thumbnails.
//!
//! The engine treats decoding and encoding as a black box behind
//! [`ImageCodec`]; [`ImageCrateCodec`] implements it with the `image` crate.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use thiserror::Error;

/// Errors produced by an image codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The file could not be opened.
    #[error("failed to open image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The format could not be recognized.
    #[error("unrecognized image format: {0}")]
    UnknownFormat(PathBuf),

    /// The image data could not be decoded.
    #[error("failed to decode image {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// The resized image could not be encoded.
    #[error("failed to encode thumbnail for {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Decoding and re-encoding of images.
pub trait ImageCodec: Send + Sync {
    /// Pixel dimensions `(width, height)` of an image file.
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), CodecError>;

    /// Produce a copy fit to `max_width` (never upscaled), encoded in the
    /// source's own format.
    fn thumbnail(&self, path: &Path, max_width: u32) -> Result<Vec<u8>, CodecError>;
}

/// Target size when fitting `(width, height)` to `max_width`.
pub fn fit_to_width(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled = (u64::from(height) * u64::from(max_width) + u64::from(width) / 2) / u64::from(width);
    (max_width, scaled.max(1) as u32)
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCrateCodec {
    fn open(path: &Path) -> Result<(image::DynamicImage, ImageFormat), CodecError> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|source| CodecError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let format = reader
            .format()
            .ok_or_else(|| CodecError::UnknownFormat(path.to_path_buf()))?;
        let image = reader.decode().map_err(|e| CodecError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok((image, format))
    }
}

impl ImageCodec for ImageCrateCodec {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), CodecError> {
        image::image_dimensions(path).map_err(|e| CodecError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn thumbnail(&self, path: &Path, max_width: u32) -> Result<Vec<u8>, CodecError> {
        let (image, format) = Self::open(path)?;
        let (width, height) = fit_to_width(image.width(), image.height(), max_width);

        let resized = if width == image.width() {
            image
        } else {
            image.resize_exact(width, height, FilterType::Triangle)
        };

        let mut bytes = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut bytes), format)
            .map_err(|e| CodecError::Encode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(bytes)
    }
}
