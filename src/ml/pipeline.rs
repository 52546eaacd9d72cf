use ndarray::{Array, Array4};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use image::imageops::{self, FilterType};

/// Padding colour used by YOLO letterboxing.
const LETTERBOX_FILL: u8 = 114;

/// CLIP/BLIP image statistics.
const CAPTION_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CAPTION_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Maps coordinates in the letterboxed tensor back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resizes keeping aspect ratio into a `size`x`size` canvas, pads with grey,
/// and scales pixels to 0.0-1.0 in NCHW layout.
pub fn normalize_for_detector(image: &DynamicImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(&image.to_rgb8(), new_w, new_h, FilterType::Triangle);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let mut array = Array::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        array[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        array[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        array[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (array, letterbox)
}

/// Squashes to `size`x`size` and applies mean/std normalisation.
pub fn normalize_for_captioner(image: &DynamicImage, size: u32) -> Array4<f32> {
    let resized = image.resize_exact(size, size, FilterType::CatmullRom);
    let mut array = Array::zeros((1, 3, size as usize, size as usize));

    for (x, y, pixel) in resized.pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            array[[0, c, y as usize, x as usize]] = (v - CAPTION_MEAN[c]) / CAPTION_STD[c];
        }
    }

    array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_the_short_side() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 0, 0])));
        let (array, lb) = normalize_for_detector(&image, 64);

        assert_eq!(array.shape(), &[1, 3, 64, 64]);
        assert!((lb.scale - 0.32).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);

        // top padding is grey, centre is the red source
        assert!((array[[0, 0, 0, 10]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((array[[0, 0, 32, 32]] - 1.0).abs() < 1e-6);
        assert!(array[[0, 1, 32, 32]].abs() < 1e-6);

        let (x, y) = lb.to_source(32.0, 32.0);
        assert!((x - 100.0).abs() < 1e-3);
        assert!((y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn caption_input_is_standardised() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([0, 0, 0])));
        let array = normalize_for_captioner(&image, 16);
        assert_eq!(array.shape(), &[1, 3, 16, 16]);
        let expected = -CAPTION_MEAN[2] / CAPTION_STD[2];
        assert!((array[[0, 2, 5, 5]] - expected).abs() < 1e-5);
    }
}
