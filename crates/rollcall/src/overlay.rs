//! Operator feedback: face boxes and "Name Roll" labels drawn onto the frame.

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rollcall_core::FaceMatch;

const FONT_DATA: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LINE_WIDTH: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
/// Pixels between the label's bottom edge and the box.
const LABEL_GAP: i32 = 4;

/// Draws recognition results. Holds the parsed label font.
pub struct Overlay {
    font: FontRef<'static>,
    scale: PxScale,
}

impl Overlay {
    pub fn new() -> Result<Self, InvalidFont> {
        Ok(Self {
            font: FontRef::try_from_slice(FONT_DATA)?,
            scale: PxScale::from(LABEL_SCALE),
        })
    }

    /// One box per match with its label above it: green for roster members,
    /// red for unknown faces.
    pub fn draw_matches(&self, image: &mut RgbImage, matches: &[FaceMatch]) {
        for m in matches {
            let color = if m.identity.is_some() { KNOWN_COLOR } else { UNKNOWN_COLOR };
            let label = m.label();

            let (_, text_h) = text_size(self.scale, &self.font, &label);
            let text_y = (m.bbox.y.round() as i32 - text_h as i32 - LABEL_GAP).max(0);
            let text_x = (m.bbox.x.round() as i32).max(0);
            draw_text_mut(image, color, text_x, text_y, self.scale, &self.font, &label);

            draw_box(image, m.bbox.x, m.bbox.y, m.bbox.width, m.bbox.height, color);
        }
    }
}

/// Outline a rectangle `LINE_WIDTH` pixels thick, clipped to the image.
fn draw_box(image: &mut RgbImage, x: f32, y: f32, w: f32, h: f32, color: Rgb<u8>) {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 || w <= 0.0 || h <= 0.0 {
        return;
    }

    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(img_w - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(img_h - 1);
    let (x0, x1) = (clamp_x(x), clamp_x(x + w));
    let (y0, y1) = (clamp_y(y), clamp_y(y + h));
    let (outer_w, outer_h) = (x1 - x0 + 1, y1 - y0 + 1);

    for t in 0..LINE_WIDTH {
        if outer_w <= 2 * t || outer_h <= 2 * t {
            break;
        }
        let rect = Rect::at((x0 + t) as i32, (y0 + t) as i32).of_size(outer_w - 2 * t, outer_h - 2 * t);
        draw_hollow_rect_mut(image, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{BoundingBox, Identity};

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn face(identity: Option<Identity>) -> FaceMatch {
        FaceMatch {
            bbox: BoundingBox { x: 20.0, y: 40.0, width: 40.0, height: 40.0, confidence: 0.9 },
            identity,
            distance: 0.3,
        }
    }

    /// Pixels in rows `0..rows` that are not black.
    fn inked_above(img: &RgbImage, rows: u32) -> Vec<Rgb<u8>> {
        img.enumerate_pixels()
            .filter(|&(_, y, p)| y < rows && *p != BLACK)
            .map(|(_, _, p)| *p)
            .collect()
    }

    #[test]
    fn known_face_gets_green_box_and_label() {
        let overlay = Overlay::new().unwrap();
        let mut img = RgbImage::new(100, 100);
        overlay.draw_matches(&mut img, &[face(Some(Identity::new("Yogesh", "2310991246")))]);

        assert_eq!(*img.get_pixel(20, 40), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(60, 80), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(21, 60), KNOWN_COLOR);
        // Interior untouched.
        assert_eq!(*img.get_pixel(40, 60), BLACK);

        let label = inked_above(&img, 38);
        assert!(!label.is_empty(), "no label drawn above the box");
        assert!(label.iter().all(|p| p[0] == 0 && p[1] > 0 && p[2] == 0));
    }

    #[test]
    fn unknown_face_gets_red_box_and_label() {
        let overlay = Overlay::new().unwrap();
        let mut img = RgbImage::new(100, 100);
        overlay.draw_matches(&mut img, &[face(None)]);

        assert_eq!(*img.get_pixel(20, 60), UNKNOWN_COLOR);
        let label = inked_above(&img, 38);
        assert!(!label.is_empty());
        assert!(label.iter().all(|p| p[0] > 0 && p[1] == 0 && p[2] == 0));
    }

    #[test]
    fn label_stays_inside_image_for_box_at_top() {
        let overlay = Overlay::new().unwrap();
        let mut img = RgbImage::new(100, 100);
        let mut m = face(Some(Identity::new("Jiya", "2310990619")));
        m.bbox.y = 0.0;
        overlay.draw_matches(&mut img, &[m]);
        assert_eq!(*img.get_pixel(20, 0), KNOWN_COLOR);
    }

    #[test]
    fn boxes_are_clipped_to_image() {
        let mut img = RgbImage::new(10, 10);
        draw_box(&mut img, -5.0, -5.0, 100.0, 100.0, KNOWN_COLOR);
        assert_eq!(*img.get_pixel(0, 0), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(9, 9), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(1, 1), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(5, 5), BLACK);
    }
}
