//! Basic image augmentations for building perturbed VQA image sets.

use crate::error::{Result, VqaError};
use image::{Rgb, RgbImage};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BRIGHTNESS: f64 = 1.2;
pub const DEFAULT_CONTRAST: f64 = 1.1;
pub const DEFAULT_BLUR_RADIUS: f32 = 1.0;

/// Load an image from disk as 8-bit RGB.
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbImage> {
    crate::inference::load_rgb_image(path.as_ref())
}

/// Save an image, creating parent directories as needed. The format
/// follows the file extension.
pub fn save_image(image: &RgbImage, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| VqaError::io(parent, e))?;
    }
    image.save(path).map_err(|e| VqaError::image(path, e))
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VqaError::invalid(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )))
    }
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Scale brightness, then contrast. Factors of 1.0 leave the image as is.
///
/// Brightness blends each pixel with black; contrast blends it with the
/// mean grey level of the brightened image.
pub fn adjust_brightness_contrast(
    image: &RgbImage,
    brightness: f64,
    contrast: f64,
) -> Result<RgbImage> {
    non_negative("brightness", brightness)?;
    non_negative("contrast", contrast)?;

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = to_channel(*c as f64 * brightness);
        }
    }

    let mean = mean_grey(&out);
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = to_channel(mean + (*c as f64 - mean) * contrast);
        }
    }

    Ok(out)
}

/// ITU-R 601 luma, averaged over the image and rounded to a grey level.
fn mean_grey(image: &RgbImage) -> f64 {
    let count = image.width() as usize * image.height() as usize;
    if count == 0 {
        return 0.0;
    }
    let total: f64 = image
        .pixels()
        .map(|Rgb([r, g, b])| {
            (299 * *r as u32 + 587 * *g as u32 + 114 * *b as u32) as f64 / 1000.0
        })
        .sum();
    (total / count as f64).round()
}

/// Gaussian blur; `radius` is the standard deviation in pixels.
pub fn blur(image: &RgbImage, radius: f32) -> Result<RgbImage> {
    non_negative("blur radius", radius as f64)?;
    if radius == 0.0 {
        return Ok(image.clone());
    }
    Ok(image::imageops::blur(image, radius))
}

/// Add zero-mean Gaussian noise with the given variance in pixel units.
pub fn add_noise<R: Rng>(image: &RgbImage, variance: f64, rng: &mut R) -> Result<RgbImage> {
    non_negative("noise variance", variance)?;
    let normal = Normal::new(0.0, variance.sqrt())
        .map_err(|e| VqaError::invalid(format!("invalid noise distribution: {}", e)))?;

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            let noisy = *c as f64 + normal.sample(rng);
            *c = noisy.clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Rotate counter-clockwise about the centre. The canvas grows to hold the
/// whole rotated image; uncovered pixels are black.
pub fn rotate(image: &RgbImage, degrees: f64) -> Result<RgbImage> {
    if !degrees.is_finite() {
        return Err(VqaError::invalid(format!("cannot rotate by {}", degrees)));
    }

    let (w, h) = (image.width() as f64, image.height() as f64);
    let (sin, cos) = degrees.to_radians().sin_cos();

    // 1e-9 absorbs sin/cos rounding at multiples of 90 degrees.
    let out_w = (w * cos.abs() + h * sin.abs() - 1e-9).ceil().max(0.0) as u32;
    let out_h = (w * sin.abs() + h * cos.abs() - 1e-9).ceil().max(0.0) as u32;

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ocx, ocy) = (out_w as f64 / 2.0, out_h as f64 / 2.0);

    // inverse mapping, nearest neighbour
    let out = RgbImage::from_fn(out_w, out_h, |x, y| {
        let dx = x as f64 + 0.5 - ocx;
        let dy = y as f64 + 0.5 - ocy;
        let sx = (dx * cos - dy * sin + cx).floor();
        let sy = (dx * sin + dy * cos + cy).floor();
        if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
            *image.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        }
    });

    Ok(out)
}

/// One augmentation step with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Augmentation {
    BrightnessContrast { brightness: f64, contrast: f64 },
    Blur { radius: f32 },
    Noise { variance: f64 },
    Rotate { degrees: f64 },
}

impl Augmentation {
    /// Brightness 1.2 and contrast 1.1, then a blur of radius 1.0.
    pub fn default_chain() -> Vec<Augmentation> {
        vec![
            Augmentation::BrightnessContrast {
                brightness: DEFAULT_BRIGHTNESS,
                contrast: DEFAULT_CONTRAST,
            },
            Augmentation::Blur {
                radius: DEFAULT_BLUR_RADIUS,
            },
        ]
    }

    pub fn apply<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> Result<RgbImage> {
        match *self {
            Augmentation::BrightnessContrast {
                brightness,
                contrast,
            } => adjust_brightness_contrast(image, brightness, contrast),
            Augmentation::Blur { radius } => blur(image, radius),
            Augmentation::Noise { variance } => add_noise(image, variance, rng),
            Augmentation::Rotate { degrees } => rotate(image, degrees),
        }
    }
}

/// Apply `steps` in order, or the default chain when `steps` is `None`.
pub fn apply_augmentations<R: Rng>(
    image: &RgbImage,
    steps: Option<&[Augmentation]>,
    rng: &mut R,
) -> Result<RgbImage> {
    let defaults;
    let steps = match steps {
        Some(steps) => steps,
        None => {
            defaults = Augmentation::default_chain();
            &defaults
        }
    };

    let mut current = image.clone();
    for step in steps {
        log::debug!("Applying {:?}", step);
        current = step.apply(&current, rng)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 100]))
    }

    #[test]
    fn test_identity_factors_leave_image_unchanged() {
        let image = gradient(5, 4);
        let out = adjust_brightness_contrast(&image, 1.0, 1.0).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn test_brightness_scales_and_clamps() {
        let image = RgbImage::from_pixel(2, 2, Rgb([100, 200, 10]));
        let out = adjust_brightness_contrast(&image, 1.5, 1.0).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([150, 255, 15]));

        let dark = adjust_brightness_contrast(&image, 0.0, 1.0).unwrap();
        assert_eq!(dark.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_zero_contrast_gives_flat_grey() {
        let image = gradient(4, 4);
        let out = adjust_brightness_contrast(&image, 1.0, 0.0).unwrap();
        let first = *out.get_pixel(0, 0);
        assert!(out.pixels().all(|p| *p == first));
        assert_eq!(first.0[0], first.0[1]);
    }

    #[test]
    fn test_negative_factors_rejected() {
        let image = gradient(2, 2);
        assert!(matches!(
            adjust_brightness_contrast(&image, -0.1, 1.0),
            Err(VqaError::InvalidArgument(_))
        ));
        assert!(matches!(blur(&image, -1.0), Err(VqaError::InvalidArgument(_))));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            add_noise(&image, -0.5, &mut rng),
            Err(VqaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_blur_keeps_size_and_flat_images() {
        let flat = RgbImage::from_pixel(9, 9, Rgb([80, 80, 80]));
        let out = blur(&flat, 0.5).unwrap();
        assert_eq!(out.dimensions(), (9, 9));
        assert!(out.get_pixel(4, 4).0.iter().all(|c| c.abs_diff(80) <= 1));

        assert_eq!(blur(&flat, 0.0).unwrap(), flat);
    }

    #[test]
    fn test_noise_is_seeded() {
        let image = RgbImage::from_pixel(8, 8, Rgb([128, 128, 128]));
        let a = add_noise(&image, 25.0, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = add_noise(&image, 25.0, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, image);

        let none = add_noise(&image, 0.0, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(none, image);
    }

    #[test]
    fn test_rotate_quarter_turn_expands_canvas() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 0, Rgb([255, 0, 0]));

        let out = rotate(&image, 90.0).unwrap();
        assert_eq!(out.dimensions(), (2, 3));
        // top-right corner moves to top-left
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_rotate_zero_and_diagonal() {
        let image = gradient(4, 3);
        assert_eq!(rotate(&image, 0.0).unwrap(), image);

        let out = rotate(&image, 45.0).unwrap();
        assert!(out.width() > 4 && out.height() > 3);
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_default_chain() {
        let image = gradient(6, 6);
        let mut rng = StdRng::seed_from_u64(1);
        let defaulted = apply_augmentations(&image, None, &mut rng).unwrap();

        let explicit = Augmentation::default_chain();
        let chained = apply_augmentations(&image, Some(explicit.as_slice()), &mut rng).unwrap();
        assert_eq!(defaulted, chained);
        assert_ne!(defaulted, image);
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let image = gradient(3, 3);
        let mut rng = StdRng::seed_from_u64(1);
        let out = apply_augmentations(&image, Some(&[][..]), &mut rng).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn test_augmentation_serde() {
        let step: Augmentation =
            serde_json::from_str(r#"{"kind": "rotate", "degrees": 10.0}"#).unwrap();
        assert_eq!(step, Augmentation::Rotate { degrees: 10.0 });
    }

    #[test]
    fn test_save_and_load_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sample.png");
        let image = gradient(4, 4);

        save_image(&image, &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), image);
    }

    #[test]
    fn test_load_missing_image() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_image(dir.path().join("missing.png")),
            Err(VqaError::Image { .. })
        ));
    }
}
