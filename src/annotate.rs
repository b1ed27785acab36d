//! Emergency annotation policy.
//!
//! Decides per frame whether any detection belongs to the emergency class set
//! and, if so, draws only those detections. Frames with no emergency detection
//! are left untouched; non-emergency detections are never drawn.

use std::collections::BTreeSet;

use anyhow::Result;
use image::{ImageBuffer, Rgb};

use crate::detect::Detection;
use crate::frame::Frame;

const BOX_THICKNESS: i32 = 2;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;
const LABEL_PADDING: i32 = 2;

/// Fixed set of emergency labels, matched case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmergencyClasses {
    labels: BTreeSet<String>,
}

impl EmergencyClasses {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|l| l.as_ref().trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, class_label: &str) -> bool {
        self.labels.contains(&class_label.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Default for EmergencyClasses {
    fn default() -> Self {
        Self::new(["ambulance"])
    }
}

/// Filter + draw policy applied to every frame.
#[derive(Clone, Debug)]
pub struct AnnotationPolicy {
    classes: EmergencyClasses,
    box_color: Rgb<u8>,
    text_color: Rgb<u8>,
}

impl AnnotationPolicy {
    pub fn new(classes: EmergencyClasses) -> Self {
        Self {
            classes,
            box_color: Rgb([255, 32, 32]),
            text_color: Rgb([255, 255, 255]),
        }
    }

    pub fn classes(&self) -> &EmergencyClasses {
        &self.classes
    }

    /// Detections that belong to the emergency class set.
    pub fn select<'a>(&self, detections: &'a [Detection]) -> Vec<&'a Detection> {
        detections
            .iter()
            .filter(|d| self.classes.contains(&d.class_label))
            .collect()
    }

    /// Apply the policy to one frame.
    ///
    /// Returns `true` when the frame contained an emergency detection, in which
    /// case exactly those detections have been drawn onto it.
    pub fn apply(&self, frame: &mut Frame, detections: &[Detection]) -> Result<bool> {
        let selected = self.select(detections);
        if selected.is_empty() {
            return Ok(false);
        }
        let mut image = frame.as_image_mut()?;
        for detection in &selected {
            self.draw(&mut image, detection);
        }
        Ok(true)
    }

    fn draw(&self, image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>, detection: &Detection) {
        let region = &detection.region;
        let left = region.x.round() as i32;
        let top = region.y.round() as i32;
        let right = region.right().round() as i32 - 1;
        let bottom = region.bottom().round() as i32 - 1;

        for inset in 0..BOX_THICKNESS {
            draw_rectangle(
                image,
                left + inset,
                top + inset,
                right - inset,
                bottom - inset,
                self.box_color,
            );
        }

        let label = format!(
            "{} {:.0}%",
            detection.class_label,
            detection.confidence * 100.0
        );
        let text_width = label.chars().count() as i32 * GLYPH_ADVANCE;
        let bar_height = GLYPH_HEIGHT + LABEL_PADDING * 2;
        let bar_top = if top - bar_height >= 0 {
            top - bar_height
        } else {
            top
        };
        fill_rect(
            image,
            left,
            bar_top,
            left + text_width + LABEL_PADDING * 2 - 1,
            bar_top + bar_height - 1,
            self.box_color,
        );
        draw_label(
            image,
            left + LABEL_PADDING,
            bar_top + LABEL_PADDING,
            &label,
            self.text_color,
        );
    }
}

impl Default for AnnotationPolicy {
    fn default() -> Self {
        Self::new(EmergencyClasses::default())
    }
}

fn put_pixel(image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        *image.get_pixel_mut(x as u32, y as u32) = color;
    }
}

fn draw_rectangle(
    image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    if right < left || bottom < top {
        return;
    }
    for x in left..=right {
        put_pixel(image, x, top, color);
        put_pixel(image, x, bottom, color);
    }
    for y in top..=bottom {
        put_pixel(image, left, y, color);
        put_pixel(image, right, y, color);
    }
}

fn fill_rect(
    image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for y in top.max(0)..=bottom.min(height - 1) {
        for x in left.max(0)..=right.min(width - 1) {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(
    image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    mut x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
) {
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        put_pixel(image, x + col, y + row as i32, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 bitmap font, one byte per row, high bit on the left.
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'B' => [0x1e, 0x11, 0x11, 0x1e, 0x11, 0x11, 0x1e],
        'C' => [0x0e, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0e],
        'D' => [0x1e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1e],
        'E' => [0x1f, 0x10, 0x1e, 0x10, 0x10, 0x10, 0x1f],
        'F' => [0x1f, 0x10, 0x1e, 0x10, 0x10, 0x10, 0x10],
        'G' => [0x0e, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0f],
        'H' => [0x11, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'I' => [0x0e, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0e],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0c],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f],
        'M' => [0x11, 0x1b, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'P' => [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10],
        'Q' => [0x0e, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0d],
        'R' => [0x1e, 0x11, 0x11, 0x1e, 0x14, 0x12, 0x11],
        'S' => [0x0f, 0x10, 0x0e, 0x01, 0x01, 0x11, 0x0e],
        'T' => [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0a, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1b, 0x11],
        'X' => [0x11, 0x11, 0x0a, 0x04, 0x0a, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0a, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1f],
        '0' => [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e],
        '1' => [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e],
        '2' => [0x0e, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1f],
        '3' => [0x1e, 0x01, 0x01, 0x0e, 0x01, 0x01, 0x1e],
        '4' => [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02],
        '5' => [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e],
        '6' => [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e],
        '7' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e],
        '9' => [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c],
        '%' => [0x11, 0x12, 0x04, 0x08, 0x12, 0x11, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x0c],
        '-' => [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1f],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}
