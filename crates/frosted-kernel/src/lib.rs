//! frosted-kernel: pure image blur kernel (sans-IO).
//!
//! Produces a soft, low-resolution blur of a region of an image:
//! crop -> downscale by an integer factor -> stack (or box) blur.
//!
//! This crate has **no threading or I/O** -- it operates on in-memory
//! RGBA buffers. Queueing, caching and request coalescing live in the
//! `frosted` crate.

pub mod blur;
pub mod downscale;
pub mod types;

pub use types::{
    BlurConfig, BlurKernel, CropRegion, Dimensions, KernelError, RgbaImage, ViewBounds,
};

/// Blur `crop` of `image` according to `config`.
///
/// # Steps
///
/// 1. Resolve the crop (zero width/height selects the full axis)
/// 2. Shrink the region by `config.scale_factor` (floor division)
/// 3. Run the configured kernel at `config.radius`
///
/// # Errors
///
/// Returns [`KernelError::InvalidConfig`] if `config` fails validation,
/// [`KernelError::EmptyImage`] if `image` has no pixels,
/// [`KernelError::EmptyOutput`] if the region shrinks to nothing, and
/// [`KernelError::OutputTooLarge`] if the shrunk region is too big to
/// allocate.
pub fn blur(
    image: &RgbaImage,
    crop: CropRegion,
    config: &BlurConfig,
) -> Result<RgbaImage, KernelError> {
    config.validate()?;

    let small = downscale::crop_and_downscale(image, crop, config.scale_factor)?;

    Ok(match config.kernel {
        BlurKernel::Stack => blur::stack_blur_rgba(&small, config.radius),
        BlurKernel::Box => blur::box_blur_rgba(&small, config.radius),
    })
}
