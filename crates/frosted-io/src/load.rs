//! Reading source images from files and writing results.

use std::path::{Path, PathBuf};

use frosted::RgbaImage;
use image::ImageFormat;

/// Errors from loading or saving image files.
#[derive(Debug, thiserror::Error)]
pub enum ImageFileError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The bytes are not a supported image.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode raw image bytes (PNG, JPEG, BMP, WebP) into RGBA.
///
/// # Errors
///
/// Returns [`ImageFileError::EmptyInput`] if `bytes` is empty and
/// [`ImageFileError::Decode`] if the format is unrecognized or the data
/// is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, ImageFileError> {
    if bytes.is_empty() {
        return Err(ImageFileError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Read and decode an image file.
///
/// # Errors
///
/// Returns [`ImageFileError::Read`] if the file cannot be read, and the
/// errors of [`decode_image`] otherwise.
pub fn load_image(path: &Path) -> Result<RgbaImage, ImageFileError> {
    let bytes = std::fs::read(path).map_err(|source| ImageFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image(&bytes)
}

/// Write `image` to `path` as PNG.
///
/// # Errors
///
/// Returns [`ImageFileError::Decode`] if encoding or writing fails.
pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), ImageFileError> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
