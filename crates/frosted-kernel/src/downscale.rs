//! Crop-and-shrink step that runs before the blur pass.
//!
//! The requested [`CropRegion`] is resolved against the source image
//! (zero width/height means the full axis), then drawn into an output
//! buffer `scale_factor` times smaller with bilinear filtering. Output
//! dimensions always use floor division, so a 50x50 region at scale 8
//! becomes 6x6.
//!
//! Shrinking first keeps the blur cheap: a radius-2 blur on a 1/8
//! image looks like a radius-16 blur on the original at a 64th of the
//! pixel count.

use image::imageops::{self, FilterType};

use crate::types::{CropRegion, Dimensions, KernelError, RgbaImage};

/// A crop region with the "zero means full" rule applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRegion {
    /// Left edge in source pixels.
    pub left: u32,
    /// Top edge in source pixels.
    pub top: u32,
    /// Region size in source pixels.
    pub size: Dimensions,
}

/// Resolve `crop` against a source of `source` dimensions.
///
/// # Errors
///
/// Returns [`KernelError::EmptyImage`] if the source has no pixels.
pub const fn resolve_region(
    source: Dimensions,
    crop: CropRegion,
) -> Result<ResolvedRegion, KernelError> {
    if source.is_empty() {
        return Err(KernelError::EmptyImage {
            width: source.width,
            height: source.height,
        });
    }

    let width = if crop.width == 0 {
        source.width
    } else {
        crop.width
    };
    let height = if crop.height == 0 {
        source.height
    } else {
        crop.height
    };

    Ok(ResolvedRegion {
        left: crop.left,
        top: crop.top,
        size: Dimensions { width, height },
    })
}

/// Output dimensions for a region of `size` shrunk by `scale_factor`.
///
/// # Errors
///
/// Returns [`KernelError::EmptyOutput`] if either axis floors to zero.
pub const fn scaled_dimensions(
    size: Dimensions,
    scale_factor: u32,
) -> Result<Dimensions, KernelError> {
    let scaled = Dimensions {
        width: size.width / scale_factor,
        height: size.height / scale_factor,
    };
    if scaled.is_empty() {
        return Err(KernelError::EmptyOutput {
            width: size.width,
            height: size.height,
            scale_factor,
        });
    }
    Ok(scaled)
}

/// Largest pixel count a shrunk region may have.
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 28;

/// Crop `image` to `crop` and shrink the result by `scale_factor`.
///
/// Only the part of the region that overlaps the source is resampled;
/// the rest of the output stays transparent.
///
/// # Errors
///
/// Returns [`KernelError::EmptyImage`] for an empty source,
/// [`KernelError::EmptyOutput`] when the region is smaller than the
/// scale factor along either axis, and [`KernelError::OutputTooLarge`]
/// when the shrunk region exceeds [`MAX_OUTPUT_PIXELS`].
pub fn crop_and_downscale(
    image: &RgbaImage,
    crop: CropRegion,
    scale_factor: u32,
) -> Result<RgbaImage, KernelError> {
    let source = Dimensions::of(image);
    let region = resolve_region(source, crop)?;
    let target = scaled_dimensions(region.size, scale_factor)?;
    check_output_size(target)?;

    if region.left == 0 && region.top == 0 && region.size == source {
        return Ok(shrink(image, target));
    }

    let visible = Dimensions {
        width: source.width.saturating_sub(region.left).min(region.size.width),
        height: source.height.saturating_sub(region.top).min(region.size.height),
    };

    if visible == region.size {
        let cropped =
            imageops::crop_imm(image, region.left, region.top, visible.width, visible.height)
                .to_image();
        return Ok(shrink(&cropped, target));
    }

    // Pixels outside the source stay transparent.
    let mut canvas = RgbaImage::new(target.width, target.height);
    if visible.is_empty() {
        return Ok(canvas);
    }

    // The overlap always starts at the region's top-left corner.
    let overlap =
        imageops::crop_imm(image, region.left, region.top, visible.width, visible.height)
            .to_image();
    let placed = Dimensions {
        width: (visible.width / scale_factor).clamp(1, target.width),
        height: (visible.height / scale_factor).clamp(1, target.height),
    };
    imageops::replace(&mut canvas, &shrink(&overlap, placed), 0, 0);
    Ok(canvas)
}

fn check_output_size(target: Dimensions) -> Result<(), KernelError> {
    let pixels = u64::from(target.width) * u64::from(target.height);
    if pixels > MAX_OUTPUT_PIXELS {
        return Err(KernelError::OutputTooLarge {
            width: target.width,
            height: target.height,
            max_pixels: MAX_OUTPUT_PIXELS,
        });
    }
    Ok(())
}

fn shrink(image: &RgbaImage, target: Dimensions) -> RgbaImage {
    if Dimensions::of(image) == target {
        return image.clone();
    }
    imageops::resize(image, target.width, target.height, FilterType::Triangle)
}
