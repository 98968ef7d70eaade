//! Small pixel-level helpers shared by the diagnostic and enhancement
//! stages.

use image::{GrayImage, ImageBuffer, Luma};

/// 3×3 convolution with replicated borders, accumulating in i32.
/// Returns the raw (unclamped) responses so callers can either measure
/// them or clamp them back into pixel range.
pub(crate) fn convolve3x3(img: &GrayImage, kernel: [i32; 9]) -> Vec<i32> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let mut out = vec![0i32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0i32;
            for ky in -1..=1 {
                for kx in -1..=1 {
                    let sx = (x + kx).clamp(0, w - 1);
                    let sy = (y + ky).clamp(0, h - 1);
                    let k = kernel[((ky + 1) * 3 + (kx + 1)) as usize];
                    acc += k * img.get_pixel(sx as u32, sy as u32)[0] as i32;
                }
            }
            out[(y * w + x) as usize] = acc;
        }
    }
    out
}

/// Apply a 3×3 kernel and clamp the responses back to u8.
pub(crate) fn convolve3x3_clamped(img: &GrayImage, kernel: [i32; 9]) -> GrayImage {
    let responses = convolve3x3(img, kernel);
    let w = img.width();
    ImageBuffer::from_fn(w, img.height(), |x, y| {
        Luma([responses[(y * w + x) as usize].clamp(0, 255) as u8])
    })
}

/// Variance of the Laplacian response. Low values mean a blurry image.
pub(crate) fn laplacian_variance(img: &GrayImage) -> f32 {
    let lap = convolve3x3(img, [0, 1, 0, 1, -4, 1, 0, 1, 0]);
    if lap.is_empty() {
        return 0.0;
    }
    let n = lap.len() as f64;
    let mean: f64 = lap.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var: f64 = lap.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    var as f32
}

/// Mean and population standard deviation of pixel intensities.
pub(crate) fn mean_std(img: &GrayImage) -> (f32, f32) {
    let n = (img.width() * img.height()) as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean: f64 = img.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let var: f64 = img.pixels().map(|p| (p[0] as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

/// Photometric inversion (white-on-black to black-on-white).
pub(crate) fn invert(img: &GrayImage) -> GrayImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        Luma([255 - img.get_pixel(x, y)[0]])
    })
}

/// Linear stretch of the observed intensity range to the full 0..255 span.
/// Uniform images are returned untouched.
pub(crate) fn stretch_contrast(img: &GrayImage) -> GrayImage {
    let (min_px, max_px) = img
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));
    if max_px == min_px {
        return img.clone();
    }
    let range = (max_px - min_px) as u32;
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y)[0];
        Luma([((p - min_px) as u32 * 255 / range) as u8])
    })
}
