//! Shared types for the frosted blur kernel.

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hand images to the
/// kernel without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an existing image.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Sub-rectangle of the source image to blur.
///
/// A zero `width` or `height` means "the full extent of the source
/// image along that axis". The rectangle may extend past the image
/// edges; pixels outside the source are transparent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRegion {
    /// Crop width in source pixels (0 = full width).
    pub width: u32,
    /// Crop height in source pixels (0 = full height).
    pub height: u32,
    /// Left edge of the crop in source pixels.
    pub left: u32,
    /// Top edge of the crop in source pixels.
    pub top: u32,
}

impl CropRegion {
    /// Blur the whole source image.
    pub const FULL: Self = Self {
        width: 0,
        height: 0,
        left: 0,
        top: 0,
    };

    /// Create a crop region.
    #[must_use]
    pub const fn new(width: u32, height: u32, left: u32, top: u32) -> Self {
        Self {
            width,
            height,
            left,
            top,
        }
    }

    /// Returns `true` if this region selects the full image.
    #[must_use]
    pub const fn is_full(self) -> bool {
        self.width == 0 && self.height == 0 && self.left == 0 && self.top == 0
    }
}

/// Layout bounds of an on-screen element the blur should line up with.
///
/// Positions come from a layout system and may be negative when the
/// element is scrolled partially off-screen; they are clamped to zero
/// when converted into a [`CropRegion`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewBounds {
    /// Measured width of the element.
    pub measured_width: u32,
    /// Measured height of the element.
    pub measured_height: u32,
    /// Left position relative to the source image.
    pub left: i32,
    /// Top position relative to the source image.
    pub top: i32,
}

impl From<ViewBounds> for CropRegion {
    fn from(bounds: ViewBounds) -> Self {
        Self {
            width: bounds.measured_width,
            height: bounds.measured_height,
            left: bounds.left.max(0).unsigned_abs(),
            top: bounds.top.max(0).unsigned_abs(),
        }
    }
}

/// Which blur kernel to run after downscaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlurKernel {
    /// Stack blur: triangle-weighted moving sum, close to a Gaussian.
    #[default]
    Stack,
    /// Plain box filter per colour channel.
    Box,
}

/// Tunables for the blur algorithm.
///
/// A larger `scale_factor` is faster and blockier; a larger `radius`
/// produces a stronger blur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    /// Integer factor the region is shrunk by before blurring.
    /// Output dimensions are `floor(region / scale_factor)`.
    pub scale_factor: u32,

    /// Blur radius in downscaled pixels. Zero disables the blur pass
    /// (the downscaled region is returned as-is).
    pub radius: u32,

    /// Kernel applied after downscaling.
    pub kernel: BlurKernel,
}

impl BlurConfig {
    /// Default downscale factor.
    pub const DEFAULT_SCALE_FACTOR: u32 = 8;

    /// Default blur radius.
    pub const DEFAULT_RADIUS: u32 = 2;

    /// Largest accepted radius.
    pub const MAX_RADIUS: u32 = 254;

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidConfig`] if `scale_factor` is zero
    /// or `radius` exceeds [`Self::MAX_RADIUS`].
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.scale_factor == 0 {
            return Err(KernelError::InvalidConfig(
                "scale_factor must be at least 1".to_string(),
            ));
        }
        if self.radius > Self::MAX_RADIUS {
            return Err(KernelError::InvalidConfig(format!(
                "radius {} exceeds maximum {}",
                self.radius,
                Self::MAX_RADIUS,
            )));
        }
        Ok(())
    }
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            scale_factor: Self::DEFAULT_SCALE_FACTOR,
            radius: Self::DEFAULT_RADIUS,
            kernel: BlurKernel::default(),
        }
    }
}

/// Errors the blur kernel can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The source image has no pixels.
    #[error("source image is empty ({width}x{height})")]
    EmptyImage {
        /// Source width.
        width: u32,
        /// Source height.
        height: u32,
    },

    /// The region shrinks to nothing at the configured scale factor.
    #[error("blur region {width}x{height} is smaller than scale factor {scale_factor}")]
    EmptyOutput {
        /// Region width in source pixels.
        width: u32,
        /// Region height in source pixels.
        height: u32,
        /// Configured downscale factor.
        scale_factor: u32,
    },

    /// The shrunk region would need more pixels than one image may hold.
    #[error("blurred output {width}x{height} exceeds {max_pixels} pixels")]
    OutputTooLarge {
        /// Output width in pixels.
        width: u32,
        /// Output height in pixels.
        height: u32,
        /// Largest accepted pixel count.
        max_pixels: u64,
    },

    /// Blur configuration is invalid.
    #[error("invalid blur configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn blur_config_defaults() {
        let config = BlurConfig::default();
        assert_eq!(config.scale_factor, 8);
        assert_eq!(config.radius, 2);
        assert_eq!(config.kernel, BlurKernel::Stack);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_scale_factor_is_invalid() {
        let config = BlurConfig {
            scale_factor: 0,
            ..BlurConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(KernelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_radius_is_invalid() {
        let config = BlurConfig {
            radius: BlurConfig::MAX_RADIUS + 1,
            ..BlurConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let config: BlurConfig = serde_json::from_str(r#"{"radius": 5}"#).unwrap();
        assert_eq!(config.radius, 5);
        assert_eq!(config.scale_factor, BlurConfig::DEFAULT_SCALE_FACTOR);
        assert_eq!(config.kernel, BlurKernel::Stack);
    }

    #[test]
    fn view_bounds_clamp_negative_positions() {
        let crop = CropRegion::from(ViewBounds {
            measured_width: 320,
            measured_height: 48,
            left: -12,
            top: 200,
        });
        assert_eq!(crop, CropRegion::new(320, 48, 0, 200));
    }

    #[test]
    fn full_region_is_default() {
        assert_eq!(CropRegion::default(), CropRegion::FULL);
        assert!(CropRegion::FULL.is_full());
        assert!(!CropRegion::new(0, 0, 1, 0).is_full());
    }

    #[test]
    fn empty_output_display() {
        let err = KernelError::EmptyOutput {
            width: 4,
            height: 4,
            scale_factor: 8,
        };
        assert_eq!(
            err.to_string(),
            "blur region 4x4 is smaller than scale factor 8",
        );
    }
}
