//! Blur kernels applied to the downscaled region.
//!
//! [`stack_blur_rgba`] is the default: a linear-time approximation of a
//! Gaussian that weights each neighbour by `radius + 1 - distance`.
//! It keeps three running sums per colour channel (the whole window,
//! its incoming half, and its outgoing half) so every pixel costs O(1)
//! regardless of radius. Rows are blurred first, then columns. Edges
//! clamp to the nearest pixel.
//!
//! [`box_blur_rgba`] wraps [`imageproc::filter::box_filter`] and blurs
//! each colour channel independently.
//!
//! Both kernels blur R, G and B only; alpha is carried over untouched.

use image::GrayImage;

use crate::types::RgbaImage;

type Rgb = [u64; 3];

/// Apply a stack blur of `radius` to the colour channels of `image`.
///
/// A zero radius returns the image unchanged.
#[must_use = "returns the blurred image"]
pub fn stack_blur_rgba(image: &RgbaImage, radius: u32) -> RgbaImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if radius == 0 || w == 0 || h == 0 {
        return image.clone();
    }
    let radius = radius as usize;

    let mut rgb: Vec<Rgb> = image
        .pixels()
        .map(|p| [u64::from(p.0[0]), u64::from(p.0[1]), u64::from(p.0[2])])
        .collect();

    let mut line: Vec<Rgb> = Vec::with_capacity(w.max(h));

    for row in rgb.chunks_exact_mut(w) {
        line.clear();
        line.extend_from_slice(row);
        stack_blur_line(&line, radius, |x, value| row[x] = value);
    }

    for x in 0..w {
        line.clear();
        line.extend((0..h).map(|y| rgb[y * w + x]));
        stack_blur_line(&line, radius, |y, value| rgb[y * w + x] = value);
    }

    let mut out = image.clone();
    for (pixel, value) in out.pixels_mut().zip(&rgb) {
        pixel.0[0] = channel_u8(value[0]);
        pixel.0[1] = channel_u8(value[1]);
        pixel.0[2] = channel_u8(value[2]);
    }
    out
}

/// Blur one row or column, handing each output sample to `emit`.
///
/// With the window centred on `x`, `sum` is the triangle-weighted total,
/// `sum_out` covers positions `x - radius ..= x` (weights that shrink on
/// the next step) and `sum_in` covers `x + 1 ..= x + radius` (weights
/// that grow). Advancing one pixel subtracts `sum_out`, adds the new
/// `sum_in`, then shifts the centre pixel from `in` to `out`.
fn stack_blur_line(src: &[Rgb], radius: usize, mut emit: impl FnMut(usize, Rgb)) {
    let last = src.len() - 1;
    let at = |pos: usize| src[pos.min(last)];
    let divisor = ((radius + 1) * (radius + 1)) as u64;

    let mut sum: Rgb = [0; 3];
    let mut sum_in: Rgb = [0; 3];
    let mut sum_out: Rgb = [0; 3];

    // Window for x = 0 spans offsets -radius..=radius; offsets left of
    // the line clamp to pixel 0.
    for k in 0..=2 * radius {
        let value = at(k.saturating_sub(radius));
        let weight = (radius + 1 - k.abs_diff(radius)) as u64;
        for c in 0..3 {
            sum[c] += value[c] * weight;
            if k > radius {
                sum_in[c] += value[c];
            } else {
                sum_out[c] += value[c];
            }
        }
    }

    for x in 0..src.len() {
        emit(x, sum.map(|s| s / divisor));

        let leaving = at(x.saturating_sub(radius));
        let entering = at(x + radius + 1);
        let next_centre = at(x + 1);
        for c in 0..3 {
            sum[c] -= sum_out[c];
            sum_out[c] -= leaving[c];
            sum_in[c] += entering[c];
            sum[c] += sum_in[c];
            sum_out[c] += next_centre[c];
            sum_in[c] -= next_centre[c];
        }
    }
}

fn channel_u8(value: u64) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Apply a box blur of `radius` to the colour channels of `image`.
///
/// `imageproc::filter::box_filter` only accepts `GrayImage`, so the
/// colour channels are split out, filtered, and written back. A zero
/// radius returns the image unchanged.
#[must_use = "returns the blurred image"]
pub fn box_blur_rgba(image: &RgbaImage, radius: u32) -> RgbaImage {
    if radius == 0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let (w, h) = (image.width(), image.height());

    let blurred: [GrayImage; 3] = std::array::from_fn(|c| {
        let channel = GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[c]]));
        imageproc::filter::box_filter(&channel, radius, radius)
    });

    RgbaImage::from_fn(w, h, |x, y| {
        image::Rgba([
            blurred[0].get_pixel(x, y).0[0],
            blurred[1].get_pixel(x, y).0[0],
            blurred[2].get_pixel(x, y).0[0],
            image.get_pixel(x, y).0[3],
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Left half black, right half white, fully opaque.
    fn sharp_edge_image() -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 255])
            }
        })
    }

    /// Reference stack blur: direct triangle-weighted sum per pixel.
    fn naive_line(src: &[u64], radius: usize) -> Vec<u64> {
        let last = src.len() - 1;
        let divisor = ((radius + 1) * (radius + 1)) as u64;
        (0..src.len())
            .map(|x| {
                let mut total = 0;
                for k in 0..=2 * radius {
                    let pos = (x + k).saturating_sub(radius).min(last);
                    total += src[pos] * (radius + 1 - k.abs_diff(radius)) as u64;
                }
                total / divisor
            })
            .collect()
    }

    #[test]
    fn zero_radius_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(stack_blur_rgba(&img, 0), img);
        assert_eq!(box_blur_rgba(&img, 0), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = RgbaImage::new(17, 31);
        assert_eq!(stack_blur_rgba(&img, 3).dimensions(), (17, 31));
        assert_eq!(box_blur_rgba(&img, 3).dimensions(), (17, 31));
    }

    #[test]
    fn moving_sum_matches_direct_sum() {
        let src: Vec<u64> = vec![0, 255, 10, 90, 200, 3, 77, 128, 255, 0, 40];
        for radius in 1..=4 {
            let lines: Vec<Rgb> = src.iter().map(|&v| [v, 255 - v, v / 2]).collect();
            let mut got = vec![[0; 3]; src.len()];
            stack_blur_line(&lines, radius, |x, v| got[x] = v);

            let expected = naive_line(&src, radius);
            for (x, value) in got.iter().enumerate() {
                assert_eq!(value[0], expected[x], "radius {radius}, x {x}");
            }
        }
    }

    #[test]
    fn radius_wider_than_line_clamps_to_edges() {
        let src: Vec<u64> = vec![10, 250];
        let lines: Vec<Rgb> = src.iter().map(|&v| [v; 3]).collect();
        let mut got = vec![[0; 3]; 2];
        stack_blur_line(&lines, 5, |x, v| got[x] = v);
        let expected = naive_line(&src, 5);
        assert_eq!(got[0][0], expected[0]);
        assert_eq!(got[1][0], expected[1]);
    }

    #[test]
    fn stack_blur_smooths_sharp_edge() {
        let blurred = stack_blur_rgba(&sharp_edge_image(), 2);
        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];
        assert!(
            left_of_edge > 0,
            "expected blur to raise left-of-edge above 0, got {left_of_edge}",
        );
        assert!(
            right_of_edge < 255,
            "expected blur to lower right-of-edge below 255, got {right_of_edge}",
        );
    }

    #[test]
    fn box_blur_smooths_sharp_edge() {
        let blurred = box_blur_rgba(&sharp_edge_image(), 2);
        assert!(blurred.get_pixel(4, 5).0[0] > 0);
        assert!(blurred.get_pixel(5, 5).0[0] < 255);
    }

    #[test]
    fn uniform_image_unchanged_by_stack_blur() {
        let img = RgbaImage::from_pixel(9, 7, image::Rgba([100, 150, 200, 255]));
        assert_eq!(stack_blur_rgba(&img, 3), img);
    }

    #[test]
    fn alpha_is_preserved() {
        let img = RgbaImage::from_fn(6, 6, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255, 0, 0, 40])
            } else {
                image::Rgba([0, 0, 255, 220])
            }
        });
        let stacked = stack_blur_rgba(&img, 2);
        let boxed = box_blur_rgba(&img, 2);
        for (x, y, pixel) in img.enumerate_pixels() {
            assert_eq!(stacked.get_pixel(x, y).0[3], pixel.0[3]);
            assert_eq!(boxed.get_pixel(x, y).0[3], pixel.0[3]);
        }
    }

    #[test]
    fn single_pixel_image() {
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([12, 34, 56, 78]));
        assert_eq!(stack_blur_rgba(&img, 4), img);
    }
}
