//! Detection overlays drawn onto frames.
//!
//! Each detection gets a drop-shadowed box, a filled caption background in
//! the label's palette color just above the box, and the caption text drawn
//! twice (dark outline, then white) for contrast. Overlays from different
//! detections are drawn in order and may overlap. Geometry is clipped to the
//! frame, so boxes may extend arbitrarily far past its edges.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use vidsight_core::error::CoreError;
use vidsight_core::palette::ColorPalette;
use vidsight_core::types::{BoundingBox, Detection};

const BOX_THICKNESS: i64 = 2;
const SHADOW_OFFSET: i64 = 2;
const BOX_SHADOW_COLOR: Rgb<u8> = Rgb([50, 50, 50]);
const TEXT_SHADOW_COLOR: Rgb<u8> = Rgb([30, 30, 30]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const FONT_SCALE: f32 = 16.0;
/// DejaVu Sans Bold, used when no caption font is configured.
const DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

// Caption layout relative to the box's top-left corner.
const TEXT_INSET_X: i64 = 5;
const TEXT_BASELINE_GAP: i64 = 10;
const LABEL_PAD_TOP: i64 = 20;
const LABEL_PAD_RIGHT: i64 = 10;

/// Load a TrueType/OpenType font for caption text.
pub fn load_font(path: &Path) -> Result<FontArc, CoreError> {
    let bytes = std::fs::read(path).map_err(|e| {
        CoreError::Internal(format!("Failed to read font {}: {e}", path.display()))
    })?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| CoreError::Validation(format!("Invalid font {}: {e}", path.display())))
}

/// The caption font bundled with the crate.
pub fn default_font() -> Result<FontArc, CoreError> {
    FontArc::try_from_slice(DEFAULT_FONT)
        .map_err(|e| CoreError::Internal(format!("Bundled caption font is invalid: {e}")))
}

pub struct FrameAnnotator {
    palette: ColorPalette,
    font: FontArc,
}

impl FrameAnnotator {
    pub fn new(palette: ColorPalette, font: FontArc) -> Self {
        Self { palette, font }
    }

    pub fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    /// Draw every detection onto `frame`, in order.
    pub fn annotate(&self, frame: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            self.draw_detection(frame, detection);
        }
    }

    fn draw_detection(&self, frame: &mut RgbImage, detection: &Detection) {
        let color = Rgb(self.palette.resolve(&detection.label));
        let bbox = detection.bbox;

        let ((x1, y1), (x2, y2)) = corners(&bbox);
        stroke_rect(
            frame,
            ((x1 + SHADOW_OFFSET, y1 + SHADOW_OFFSET), (x2 + SHADOW_OFFSET, y2 + SHADOW_OFFSET)),
            BOX_SHADOW_COLOR,
        );
        stroke_rect(frame, ((x1, y1), (x2, y2)), color);

        let caption = detection.caption();
        let (text_w, text_h) = self.text_extent(&caption);
        let (text_w, text_h) = (i64::from(text_w), i64::from(text_h));

        fill_rect(
            frame,
            (x1 - 1, y1 - text_h - LABEL_PAD_TOP),
            (x1 + text_w + LABEL_PAD_RIGHT, y1),
            color,
        );

        let text_x = x1 + TEXT_INSET_X;
        let text_y = y1 - TEXT_BASELINE_GAP - text_h;
        // Glyphs are only rasterized when some of the caption is on screen.
        if clip(frame, (text_x - 1, text_y - 1), (text_x + text_w + 1, text_y + text_h + 1)).is_none() {
            return;
        }
        let (Ok(text_x), Ok(text_y)) = (i32::try_from(text_x), i32::try_from(text_y)) else {
            return;
        };

        let scale = PxScale::from(FONT_SCALE);
        for dy in -1..=1 {
            for dx in -1..=1 {
                draw_text_mut(frame, TEXT_SHADOW_COLOR, text_x + dx, text_y + dy, scale, &self.font, &caption);
            }
        }
        draw_text_mut(frame, TEXT_COLOR, text_x, text_y, scale, &self.font, &caption);
    }

    /// Width and height in pixels of `text` as drawn.
    fn text_extent(&self, text: &str) -> (u32, u32) {
        text_size(PxScale::from(FONT_SCALE), &self.font, text)
    }
}

type Corners = ((i64, i64), (i64, i64));

fn corners(bbox: &BoundingBox) -> Corners {
    (
        (i64::from(bbox.x1()), i64::from(bbox.y1())),
        (i64::from(bbox.x2()), i64::from(bbox.y2())),
    )
}

/// The part of `top_left..=bottom_right` inside `frame`, or `None` when
/// they do not overlap.
fn clip(frame: &RgbImage, top_left: (i64, i64), bottom_right: (i64, i64)) -> Option<Rect> {
    let left = top_left.0.max(0);
    let top = top_left.1.max(0);
    let right = bottom_right.0.min(i64::from(frame.width()) - 1);
    let bottom = bottom_right.1.min(i64::from(frame.height()) - 1);
    if left > right || top > bottom {
        return None;
    }
    Some(Rect::at(left as i32, top as i32).of_size((right - left + 1) as u32, (bottom - top + 1) as u32))
}

fn fill_rect(frame: &mut RgbImage, top_left: (i64, i64), bottom_right: (i64, i64), color: Rgb<u8>) {
    if let Some(rect) = clip(frame, top_left, bottom_right) {
        draw_filled_rect_mut(frame, rect, color);
    }
}

/// Outline the rectangle spanning `top_left..=bottom_right` with a
/// `BOX_THICKNESS`-pixel stroke growing inwards.
fn stroke_rect(frame: &mut RgbImage, (top_left, bottom_right): Corners, color: Rgb<u8>) {
    let (x1, y1) = top_left;
    let (x2, y2) = bottom_right;
    let t = BOX_THICKNESS - 1;
    fill_rect(frame, (x1, y1), (x2, y1 + t), color);
    fill_rect(frame, (x1, y2 - t), (x2, y2), color);
    fill_rect(frame, (x1, y1), (x1 + t, y2), color);
    fill_rect(frame, (x2 - t, y1), (x2, y2), color);
}
