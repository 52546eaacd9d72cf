use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::error::{PipelineError, Result};
use crate::ml::detector::Detection;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [72, 249, 10],
    [26, 147, 52],
    [0, 194, 255],
    [132, 56, 255],
];

const LINE_WIDTH: i32 = 2;
const LABEL_HEIGHT: u32 = 14;
const LABEL_SCALE: f32 = 12.0;
// Width per character when no font is loaded to measure with.
const FALLBACK_CHAR_WIDTH: u32 = 6;

/// How boxes are annotated. Without a font each box still gets its label bar,
/// just no text in it.
#[derive(Default)]
pub struct OverlayStyle {
    font: Option<FontVec>,
}

impl OverlayStyle {
    pub fn boxes_only() -> Self {
        Self::default()
    }

    /// Loads a TrueType/OpenType font for writing `label confidence` tags.
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| PipelineError::Configuration(format!("invalid font {}: {}", path.display(), e)))?;
        Ok(Self { font: Some(font) })
    }

    fn label_width(&self, text: &str) -> u32 {
        match &self.font {
            Some(font) => text_size(PxScale::from(LABEL_SCALE), font, text).0 + 4,
            None => text.chars().count() as u32 * FALLBACK_CHAR_WIDTH + 4,
        }
    }
}

/// Stable colour per label so the same class looks the same across frames.
fn color_for(label: &str) -> Rgb<u8> {
    let hash = label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    Rgb(PALETTE[hash % PALETTE.len()])
}

pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// Copy of `image` with a box and a `label confidence` tag per detection.
/// The tag sits above the box, or just inside it when the box touches the top.
pub fn draw_detections(image: &DynamicImage, detections: &[Detection], style: &OverlayStyle) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let Some((x, y, w, h)) = detection.bbox.pixel_rect(width, height) else {
            continue;
        };
        let color = color_for(&detection.label);
        for inset in 0..LINE_WIDTH {
            let iw = w as i32 - 2 * inset;
            let ih = h as i32 - 2 * inset;
            if iw <= 0 || ih <= 0 {
                break;
            }
            let rect = Rect::at(x as i32 + inset, y as i32 + inset).of_size(iw as u32, ih as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        let text = label_text(detection);
        let bar_width = style.label_width(&text).min(width - x);
        let bar_top = y.checked_sub(LABEL_HEIGHT).unwrap_or(y);
        if bar_width == 0 {
            continue;
        }
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(x as i32, bar_top as i32).of_size(bar_width, LABEL_HEIGHT),
            color,
        );
        if let Some(font) = &style.font {
            draw_text_mut(
                &mut canvas,
                Rgb([255, 255, 255]),
                x as i32 + 2,
                bar_top as i32 + 1,
                PxScale::from(LABEL_SCALE),
                font,
                &text,
            );
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::detector::BoundingBox;

    fn person(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            label: "person".into(),
            bbox: BoundingBox { x1, y1, x2, y2 },
            confidence: 0.9,
        }
    }

    fn black(size: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb([0, 0, 0])))
    }

    #[test]
    fn draws_outline_and_label_bar_above_the_box() {
        let out = draw_detections(&black(40), &[person(2.0, 20.0, 22.0, 36.0)], &OverlayStyle::boxes_only());
        let color = color_for("person");

        assert_eq!(*out.get_pixel(2, 20), color);
        assert_eq!(*out.get_pixel(3, 28), color);
        assert_eq!(*out.get_pixel(12, 28), Rgb([0, 0, 0]));
        // label bar spans rows 6..20 above the box
        assert_eq!(*out.get_pixel(4, 10), color);
        assert_eq!(*out.get_pixel(4, 3), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(30, 38), Rgb([0, 0, 0]));
    }

    #[test]
    fn label_moves_inside_a_box_touching_the_top() {
        let out = draw_detections(&black(40), &[person(5.0, 0.0, 30.0, 30.0)], &OverlayStyle::boxes_only());
        assert_eq!(*out.get_pixel(10, 8), color_for("person"));
        assert_eq!(*out.get_pixel(10, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn label_carries_class_and_confidence() {
        assert_eq!(label_text(&person(0.0, 0.0, 1.0, 1.0)), "person 0.90");
    }

    #[test]
    fn unreadable_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("font.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(matches!(
            OverlayStyle::with_font_file(&path),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn no_detections_leaves_image_unchanged() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])));
        assert_eq!(draw_detections(&image, &[], &OverlayStyle::boxes_only()), image.to_rgb8());
    }
}
