//! Detection overlay.
//!
//! Draws each detection onto its frame in place: a green box outline and the
//! `"<label>: <confidence>"` caption just inside the box's top-left corner.
//! Text uses a built-in 5x7 bitmap font scaled up, so no font files are needed
//! at runtime. Letters render upper-case.

use image::{Rgb, RgbImage};

use crate::detect::Detection;
use crate::frame::Frame;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: i32 = 2;
pub const TEXT_SCALE: i32 = 2;
/// Caption offset from the box corner, in pixels.
pub const TEXT_OFFSET: i32 = 5;

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_W + 1;

/// What was drawn for one detection, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub text: String,
    pub text_x: i32,
    pub text_y: i32,
}

/// Caption for a detection: name and confidence to two decimals.
pub fn label_text(label: &str, confidence: f32) -> String {
    format!("{}: {:.2}", label, confidence)
}

/// Width in pixels of `text` when rendered at `TEXT_SCALE`.
pub fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * TEXT_SCALE
}

pub fn text_height() -> i32 {
    GLYPH_H * TEXT_SCALE
}

/// Draw one detection onto the frame.
pub fn annotate(frame: &mut Frame, detection: &Detection, label: &str) -> Overlay {
    let image = frame.image_mut();
    let (w, h) = (image.width() as i32, image.height() as i32);
    let clamp_x = |v: f32| (v.round() as i32).clamp(0, (w - 1).max(0));
    let clamp_y = |v: f32| (v.round() as i32).clamp(0, (h - 1).max(0));

    let (x1, x2) = (clamp_x(detection.bbox.x1), clamp_x(detection.bbox.x2));
    let (y1, y2) = (clamp_y(detection.bbox.y1), clamp_y(detection.bbox.y2));
    let (left, right) = (x1.min(x2), x1.max(x2));
    let (top, bottom) = (y1.min(y2), y1.max(y2));

    for inset in 0..BOX_THICKNESS {
        if left + inset > right - inset || top + inset > bottom - inset {
            break;
        }
        draw_rectangle(
            image,
            left + inset,
            top + inset,
            right - inset,
            bottom - inset,
            BOX_COLOR,
        );
    }

    let text = label_text(label, detection.confidence);
    let text_x = left + TEXT_OFFSET;
    let text_y = top + TEXT_OFFSET;
    draw_text(image, text_x, text_y, &text, BOX_COLOR);

    Overlay {
        left,
        top,
        right,
        bottom,
        text,
        text_x,
        text_y,
    }
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        *image.get_pixel_mut(x as u32, y as u32) = color;
    }
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    for x in left..=right {
        put_pixel(image, x, top, color);
        put_pixel(image, x, bottom, color);
    }
    for y in top..=bottom {
        put_pixel(image, left, y, color);
        put_pixel(image, right, y, color);
    }
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (pattern >> (GLYPH_W - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..TEXT_SCALE {
                        for dx in 0..TEXT_SCALE {
                            put_pixel(
                                image,
                                x + col * TEXT_SCALE + dx,
                                y + row as i32 * TEXT_SCALE + dy,
                                color,
                            );
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * TEXT_SCALE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn blank_frame(w: u32, h: u32) -> Frame {
        Frame::from_rgb(w, h, vec![0u8; (w * h * 3) as usize], 1).unwrap()
    }

    fn is_green(frame: &Frame, x: i32, y: i32) -> bool {
        frame.image().get_pixel(x as u32, y as u32) == &BOX_COLOR
    }

    #[test]
    fn caption_uses_two_decimals() {
        assert_eq!(label_text("bearing_defect", 0.8765), "bearing_defect: 0.88");
        assert_eq!(label_text("headlight_defect", 1.0), "headlight_defect: 1.00");
    }

    #[test]
    fn box_outline_is_drawn_at_detection_coordinates() {
        let mut frame = blank_frame(200, 120);
        let det = Detection::new(BoundingBox::new(10.0, 20.0, 150.0, 100.0), 0, 0.91);
        let overlay = annotate(&mut frame, &det, "bearing_defect");

        assert_eq!(
            (overlay.left, overlay.top, overlay.right, overlay.bottom),
            (10, 20, 150, 100)
        );
        assert_eq!(overlay.text, "bearing_defect: 0.91");
        for (x, y) in [(10, 20), (150, 20), (10, 100), (150, 100), (80, 20), (11, 60)] {
            assert!(is_green(&frame, x, y), "expected box pixel at ({}, {})", x, y);
        }
        // Interior away from the caption stays untouched.
        assert!(!is_green(&frame, 100, 90));
        // Outside the box stays untouched.
        assert!(!is_green(&frame, 5, 5));
    }

    #[test]
    fn caption_pixels_land_inside_text_area() {
        let mut frame = blank_frame(400, 100);
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 399.0, 99.0), 1, 0.5);
        let overlay = annotate(&mut frame, &det, "coolant_hose_defect");

        let width = text_width(&overlay.text);
        let mut lit = 0;
        for y in overlay.text_y..overlay.text_y + text_height() {
            for x in overlay.text_x..overlay.text_x + width {
                if is_green(&frame, x, y) {
                    lit += 1;
                }
            }
        }
        assert!(lit > 0);
        // Nothing drawn between caption and the right edge of the box.
        for x in overlay.text_x + width..390 {
            assert!(!is_green(&frame, x, overlay.text_y + 3));
        }
    }

    #[test]
    fn out_of_frame_boxes_are_clamped() {
        let mut frame = blank_frame(50, 40);
        let det = Detection::new(BoundingBox::new(-20.0, -5.0, 80.0, 60.0), 2, 0.3);
        let overlay = annotate(&mut frame, &det, "x");
        assert_eq!(
            (overlay.left, overlay.top, overlay.right, overlay.bottom),
            (0, 0, 49, 39)
        );
        assert!(is_green(&frame, 49, 39));
    }
}
